use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use tracing::{info, warn};

use crate::error::{Result, TourError};
use crate::positioning::Placement;

/// What an `on_enter` hook sees about the step being entered
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub tour_id: &'a str,
    pub step_id: &'a str,
    pub step_index: usize,
}

/// Host-supplied side effect run when a step becomes current
pub type StepHook = Rc<dyn Fn(&StepContext<'_>) -> anyhow::Result<()>>;

#[derive(Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Locator of the element to spotlight
    pub target: String,
    #[serde(default)]
    pub position: Placement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<f64>,
    /// View the host must show before the target can exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip)]
    pub on_enter: Option<StepHook>,
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("target", &self.target)
            .field("position", &self.position)
            .field("padding", &self.padding)
            .field("route", &self.route)
            .field("on_enter", &self.on_enter.is_some())
            .finish()
    }
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            content: String::new(),
            target: target.into(),
            position: Placement::default(),
            padding: None,
            route: None,
            on_enter: None,
        }
    }

    pub fn with_text(mut self, title: impl Into<String>, content: impl Into<String>) -> Self {
        self.title = title.into();
        self.content = content.into();
        self
    }

    pub fn with_position(mut self, position: Placement) -> Self {
        self.position = position;
        self
    }

    pub fn with_padding(mut self, padding: f64) -> Self {
        self.padding = Some(padding);
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_on_enter(mut self, hook: StepHook) -> Self {
        self.on_enter = Some(hook);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TourDefinition {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub steps: Vec<StepDefinition>,
}

impl TourDefinition {
    pub fn new(id: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            steps,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&StepDefinition> {
        self.steps.get(index)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| TourError::InvalidDefinition {
            tour: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("tour id is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(invalid("tour has no steps".to_string()));
        }

        let mut seen = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                return Err(invalid(format!("step {} has an empty id", index)));
            }
            if step.target.trim().is_empty() {
                return Err(invalid(format!("step '{}' has an empty target locator", step.id)));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(invalid(format!("duplicate step id '{}'", step.id)));
            }
            if let Some(padding) = step.padding
                && (!padding.is_finite() || padding < 0.0)
            {
                return Err(invalid(format!("step '{}' has invalid padding {}", step.id, padding)));
            }
        }
        Ok(())
    }
}

/// Registered tours, immutable once added
#[derive(Debug, Default)]
pub struct TourCatalogue {
    tours: BTreeMap<String, Rc<TourDefinition>>,
}

impl TourCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tour: TourDefinition) -> Result<()> {
        if let Err(e) = tour.validate() {
            warn!(tour = %tour.id, error = %e, "Rejected tour definition");
            return Err(e);
        }
        if self.tours.contains_key(&tour.id) {
            warn!(tour = %tour.id, "Rejected duplicate tour id");
            return Err(TourError::DuplicateTour(tour.id));
        }
        info!(tour = %tour.id, steps = tour.len(), "Registered tour");
        self.tours.insert(tour.id.clone(), Rc::new(tour));
        Ok(())
    }

    pub fn get(&self, tour_id: &str) -> Option<Rc<TourDefinition>> {
        self.tours.get(tour_id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tours.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tours.is_empty()
    }

    /// Build from a JSON array of tour definitions; the first invalid tour fails the whole load
    pub fn from_json(json: &str) -> Result<Self> {
        let tours: Vec<TourDefinition> = serde_json::from_str(json)?;
        let mut catalogue = Self::new();
        for tour in tours {
            catalogue.register(tour)?;
        }
        Ok(catalogue)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tours from {:?}", path))?;
        Self::from_json(&contents).with_context(|| format!("Invalid tour catalogue {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tour(id: &str, steps: &[(&str, &str)]) -> TourDefinition {
        TourDefinition::new(
            id,
            steps
                .iter()
                .map(|(step, target)| StepDefinition::new(*step, *target))
                .collect(),
        )
    }

    #[test]
    fn test_register_and_get() {
        let mut catalogue = TourCatalogue::new();
        catalogue
            .register(tour("intro", &[("welcome", "#logo"), ("menu", "#menu")]))
            .unwrap();
        let intro = catalogue.get("intro").unwrap();
        assert_eq!(intro.len(), 2);
        assert_eq!(intro.step(1).unwrap().target, "#menu");
        assert!(catalogue.get("missing").is_none());
    }

    #[test]
    fn test_rejects_duplicate_tour() {
        let mut catalogue = TourCatalogue::new();
        catalogue.register(tour("intro", &[("a", "#a")])).unwrap();
        let err = catalogue.register(tour("intro", &[("b", "#b")])).unwrap_err();
        assert!(matches!(err, TourError::DuplicateTour(id) if id == "intro"));
        assert_eq!(catalogue.len(), 1);
    }

    #[test]
    fn test_rejects_invalid_definitions() {
        let mut catalogue = TourCatalogue::new();
        assert!(matches!(
            catalogue.register(tour("empty", &[])),
            Err(TourError::InvalidDefinition { .. })
        ));
        assert!(matches!(
            catalogue.register(tour("blank", &[("a", "  ")])),
            Err(TourError::InvalidDefinition { .. })
        ));
        assert!(matches!(
            catalogue.register(tour("dupes", &[("a", "#a"), ("a", "#b")])),
            Err(TourError::InvalidDefinition { .. })
        ));
        let negative = TourDefinition::new("pad", vec![StepDefinition::new("a", "#a").with_padding(-1.0)]);
        assert!(catalogue.register(negative).is_err());
        assert!(catalogue.is_empty());
    }

    #[test]
    fn test_from_json_defaults() {
        let json = r##"[
            {
                "id": "reports",
                "title": "Reports",
                "steps": [
                    { "id": "filters", "target": "#filters", "position": "right", "route": "/reports" },
                    { "id": "export", "target": "#export", "padding": 4 }
                ]
            }
        ]"##;
        let catalogue = TourCatalogue::from_json(json).unwrap();
        let reports = catalogue.get("reports").unwrap();
        assert_eq!(reports.title, "Reports");

        let filters = reports.step(0).unwrap();
        assert_eq!(filters.position, Placement::Right);
        assert_eq!(filters.route.as_deref(), Some("/reports"));
        assert!(filters.on_enter.is_none());

        let export = reports.step(1).unwrap();
        assert_eq!(export.position, Placement::Bottom);
        assert_eq!(export.padding, Some(4.0));
    }

    #[test]
    fn test_from_json_malformed() {
        assert!(matches!(TourCatalogue::from_json("[{"), Err(TourError::Json(_))));
    }

    #[test]
    fn test_on_enter_not_serialized() {
        let step = StepDefinition::new("a", "#a").with_on_enter(Rc::new(|_: &StepContext<'_>| -> anyhow::Result<()> { Ok(()) }));
        let json = serde_json::to_string(&step).unwrap();
        assert!(!json.contains("on_enter"));
    }
}
