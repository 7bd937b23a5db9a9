//! Navigation categories shown next to a selected client.
//!
//! Components register their categories at start-up; the front-end reads
//! them back as plain data.

use serde::{Deserialize, Serialize};

/// Where a category is listed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Behaviour {
    /// Per-client views, listed under the selected host.
    Host,
    /// Server-wide views.
    General,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Renderer name the front-end links to.
    pub name: String,
    /// Heading text.
    pub description: String,
    pub behaviour: Behaviour,
}

#[derive(Clone, Debug, Default)]
pub struct NavigationRegistry {
    categories: Vec<Category>,
}

impl NavigationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a category. A later registration with the same name replaces
    /// the earlier one in place.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        behaviour: Behaviour,
    ) -> &mut Self {
        let category = Category {
            name: name.into(),
            description: description.into(),
            behaviour,
        };
        match self.categories.iter_mut().find(|c| c.name == category.name) {
            Some(existing) => *existing = category,
            None => self.categories.push(category),
        }
        self
    }

    /// `(description, name)` pairs for per-host views, in registration order.
    pub fn host_headings(&self) -> Vec<(&str, &str)> {
        self.headings(Behaviour::Host)
    }

    /// `(description, name)` pairs for server-wide views, in registration order.
    pub fn general_headings(&self) -> Vec<(&str, &str)> {
        self.headings(Behaviour::General)
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    fn headings(&self, behaviour: Behaviour) -> Vec<(&str, &str)> {
        self.categories
            .iter()
            .filter(|c| c.behaviour == behaviour)
            .map(|c| (c.description.as_str(), c.name.as_str()))
            .collect()
    }
}
