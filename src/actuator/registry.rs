//! Static mapping from pattern name to renderer

use light_edge_shared::pattern::is_normalized;
use std::collections::BTreeMap;
use thiserror::Error;

use super::patterns::{self, RenderFn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("pattern name {0:?} is not normalized")]
    NotNormalized(String),
    #[error("pattern {0:?} registered twice")]
    Duplicate(String),
    #[error("no patterns registered")]
    Empty,
}

/// A registered pattern
#[derive(Clone, Copy)]
pub struct Renderer {
    pub name: &'static str,
    pub render: RenderFn,
    /// Whether the strip is lit while this pattern is applied
    pub lit: bool,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("name", &self.name)
            .field("lit", &self.lit)
            .finish_non_exhaustive()
    }
}

const BUILTIN: &[Renderer] = &[
    Renderer {
        name: "off",
        render: patterns::off,
        lit: false,
    },
    Renderer {
        name: "red",
        render: patterns::red,
        lit: true,
    },
    Renderer {
        name: "blue",
        render: patterns::blue,
        lit: true,
    },
    Renderer {
        name: "white",
        render: patterns::white,
        lit: true,
    },
    Renderer {
        name: "christmas",
        render: patterns::christmas,
        lit: true,
    },
    Renderer {
        name: "nicaragua",
        render: patterns::nicaragua,
        lit: true,
    },
    Renderer {
        name: "canada",
        render: patterns::canada,
        lit: true,
    },
    Renderer {
        name: "rainbow",
        render: patterns::rainbow,
        lit: true,
    },
    Renderer {
        name: "theater",
        render: patterns::theater,
        lit: true,
    },
    Renderer {
        name: "knightrider",
        render: patterns::knightrider,
        lit: true,
    },
    Renderer {
        name: "burst",
        render: patterns::burst,
        lit: true,
    },
    Renderer {
        name: "test",
        render: patterns::test,
        lit: true,
    },
];

/// Pattern lookup table, validated when built
#[derive(Debug, Clone)]
pub struct RendererRegistry {
    renderers: BTreeMap<&'static str, Renderer>,
}

impl RendererRegistry {
    /// The patterns shipped with the agent
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_renderers(BUILTIN)
    }

    pub fn from_renderers(entries: &[Renderer]) -> Result<Self, RegistryError> {
        if entries.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut renderers = BTreeMap::new();
        for renderer in entries {
            if !is_normalized(renderer.name) {
                return Err(RegistryError::NotNormalized(renderer.name.into()));
            }
            if renderers.insert(renderer.name, *renderer).is_some() {
                return Err(RegistryError::Duplicate(renderer.name.into()));
            }
        }
        Ok(Self { renderers })
    }

    /// Look up a normalized pattern name
    pub fn get(&self, name: &str) -> Option<&Renderer> {
        self.renderers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.renderers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }
}
