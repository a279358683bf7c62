//! Traffic personas and weighted persona selection.
//!
//! A persona is a named traffic pattern with a relative weight and one task
//! body. The task bodies are a closed set, so they are modelled as the
//! [`PersonaKind`] tagged variant rather than boxed closures.

use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::errors::ConfigError;

/// The task body a persona runs on every iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersonaKind {
    /// GET isochrone around one random point.
    Isochrone,
    /// GET matrix over the resolved points query.
    Matrix,
    /// POST matrix with a JSON point list.
    MatrixPost,
    /// GET route over the resolved points query.
    Route,
    /// GET route with two malformed points.
    RouteInvalid,
    /// Submit an optimization job and poll it to completion.
    Vrp,
}

impl PersonaKind {
    pub fn all() -> [PersonaKind; 6] {
        [
            PersonaKind::Isochrone,
            PersonaKind::Matrix,
            PersonaKind::MatrixPost,
            PersonaKind::Route,
            PersonaKind::RouteInvalid,
            PersonaKind::Vrp,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            PersonaKind::Isochrone => "isochrone",
            PersonaKind::Matrix => "matrix",
            PersonaKind::MatrixPost => "matrix_post",
            PersonaKind::Route => "route",
            PersonaKind::RouteInvalid => "route_invalid",
            PersonaKind::Vrp => "vrp",
        }
    }

    pub fn default_weight(&self) -> f64 {
        match self {
            PersonaKind::Vrp => 10.0,
            _ => 1.0,
        }
    }

    /// Whether the task needs the points query resolved first.
    pub fn needs_points_query(&self) -> bool {
        matches!(self, PersonaKind::Matrix | PersonaKind::Route)
    }
}

impl fmt::Display for PersonaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PersonaKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        PersonaKind::all()
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| ConfigError::UnknownPersona(s.trim().to_string()))
    }
}

/// A registered persona. Immutable after registration.
#[derive(Debug, Clone, PartialEq)]
pub struct Persona {
    pub name: String,
    pub weight: f64,
    pub kind: PersonaKind,
}

impl Persona {
    pub fn new(kind: PersonaKind, weight: f64) -> Self {
        Self {
            name: kind.name().to_string(),
            weight,
            kind,
        }
    }
}

/// Persona set with weighted random selection.
///
/// Selection draws one uniform value over the total weight and binary-searches
/// the cumulative weight table.
#[derive(Debug, Clone, Default)]
pub struct PersonaRegistry {
    personas: Vec<Arc<Persona>>,
    cumulative_weights: Vec<f64>,
    total_weight: f64,
}

impl PersonaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every persona at its default weight.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in PersonaKind::all() {
            registry.push(Persona::new(kind, kind.default_weight()));
        }
        registry
    }

    /// Build a registry from a `name[:weight],...` list, e.g. `"route:1,vrp:10"`.
    ///
    /// A name without a weight uses that persona's default weight.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, weight) = match entry.split_once(':') {
                Some((name, weight)) => {
                    let kind = PersonaKind::from_str(name)?;
                    let weight: f64 = weight.trim().parse().map_err(|_| {
                        ConfigError::invalid("PERSONAS", entry, "weight must be a number")
                    })?;
                    (kind, weight)
                }
                None => {
                    let kind = PersonaKind::from_str(entry)?;
                    (kind, kind.default_weight())
                }
            };
            registry.register(Persona::new(name, weight))?;
        }
        registry.ensure_not_empty()?;
        Ok(registry)
    }

    /// Register a persona. Zero, negative and non-finite weights are rejected.
    pub fn register(&mut self, persona: Persona) -> Result<(), ConfigError> {
        if !(persona.weight.is_finite() && persona.weight > 0.0) {
            return Err(ConfigError::InvalidWeight {
                name: persona.name,
                weight: persona.weight,
            });
        }
        self.push(persona);
        Ok(())
    }

    /// Append a persona whose weight is already known to be positive.
    fn push(&mut self, persona: Persona) {
        self.total_weight += persona.weight;
        self.cumulative_weights.push(self.total_weight);
        self.personas.push(Arc::new(persona));
    }

    pub fn ensure_not_empty(&self) -> Result<(), ConfigError> {
        if self.personas.is_empty() {
            Err(ConfigError::EmptyRegistry)
        } else {
            Ok(())
        }
    }

    /// Select a persona with probability `weight / total_weight`.
    ///
    /// Returns None only for an empty registry.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Arc<Persona>> {
        if self.personas.is_empty() {
            return None;
        }

        let random = rng.gen_range(0.0..self.total_weight);
        let index = self
            .cumulative_weights
            .binary_search_by(|weight| {
                if *weight <= random {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Greater
                }
            })
            .unwrap_or_else(|i| i);

        // Float rounding can push the draw onto the last boundary.
        let index = index.min(self.personas.len() - 1);
        Some(Arc::clone(&self.personas[index]))
    }

    pub fn personas(&self) -> &[Arc<Persona>] {
        &self.personas
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Selection probability of each persona.
    pub fn probabilities(&self) -> Vec<(String, f64)> {
        self.personas
            .iter()
            .map(|p| (p.name.clone(), p.weight / self.total_weight))
            .collect()
    }
}
