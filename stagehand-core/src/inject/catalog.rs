//! Content catalogue: message bodies and call durations per context tag.

use crate::config::{DurationRange, InjectionConfig};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;

/// Body used when a context has no templates
pub const FALLBACK_BODY: &str = "Default message.";

/// Profile used when a context has no duration entry
pub const DEFAULT_DURATION: DurationRange = DurationRange { min: 30, max: 180 };

#[derive(Debug, Clone)]
pub struct Catalog {
    templates: HashMap<String, Vec<String>>,
    durations: HashMap<String, DurationRange>,
}

impl Catalog {
    /// Built-in templates and duration profiles
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            "plot".to_string(),
            vec![
                "Hello the day is today".to_string(),
                "The deed must be done tonight".to_string(),
                "Remember our plan".to_string(),
            ],
        );
        templates.insert(
            "general".to_string(),
            vec![
                "Hey, what's up?".to_string(),
                "Can we talk?".to_string(),
                "Important message for you".to_string(),
            ],
        );

        let mut durations = HashMap::new();
        durations.insert("business".to_string(), DurationRange { min: 60, max: 300 });
        durations.insert("personal".to_string(), DurationRange { min: 30, max: 120 });
        durations.insert("emergency".to_string(), DurationRange { min: 5, max: 30 });
        durations.insert("default".to_string(), DEFAULT_DURATION);

        Self {
            templates,
            durations,
        }
    }

    /// Built-ins with configured entries replacing same-named ones
    pub fn from_config(config: &InjectionConfig) -> Self {
        let mut catalog = Self::builtin();
        for (context, bodies) in &config.templates {
            catalog
                .templates
                .insert(context.to_lowercase(), bodies.clone());
        }
        for (context, range) in &config.durations {
            catalog.durations.insert(context.to_lowercase(), *range);
        }
        catalog
    }

    /// Random template body for a context
    pub fn body<R: Rng + ?Sized>(&self, context: &str, rng: &mut R) -> String {
        self.templates
            .get(context)
            .and_then(|bodies| bodies.choose(rng))
            .cloned()
            .unwrap_or_else(|| FALLBACK_BODY.to_string())
    }

    /// Random call duration in seconds for a context.
    ///
    /// Business calls run long (up to twice the profile max); emergency calls
    /// are clipped to between 10 s and half the profile max.
    pub fn duration<R: Rng + ?Sized>(&self, context: &str, rng: &mut R) -> u32 {
        let profile = self
            .durations
            .get(context)
            .or_else(|| self.durations.get("default"))
            .copied()
            .unwrap_or(DEFAULT_DURATION);

        let (low, high) = match context {
            "business" => (profile.min, profile.max.saturating_mul(2)),
            "emergency" => (10, (profile.max / 2).max(10)),
            _ => (profile.min, profile.max),
        };
        rng.gen_range(low..=high.max(low))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_duration_profiles() {
        let catalog = Catalog::builtin();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let business = catalog.duration("business", &mut rng);
            assert!((60..=600).contains(&business));
            let emergency = catalog.duration("emergency", &mut rng);
            assert!((10..=15).contains(&emergency));
            let personal = catalog.duration("personal", &mut rng);
            assert!((30..=120).contains(&personal));
            let unknown = catalog.duration("conspiracy", &mut rng);
            assert!((30..=180).contains(&unknown));
        }
    }

    #[test]
    fn test_body_fallback() {
        let catalog = Catalog::builtin();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(catalog.body("nonexistent", &mut rng), FALLBACK_BODY);
        let plot = catalog.body("plot", &mut rng);
        assert!(catalog.templates["plot"].contains(&plot));
    }

    #[test]
    fn test_config_overrides() {
        let mut config = InjectionConfig::default();
        config
            .templates
            .insert("Heist".to_string(), vec!["Vault at noon".to_string()]);
        config
            .durations
            .insert("heist".to_string(), DurationRange { min: 7, max: 7 });
        let catalog = Catalog::from_config(&config);
        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(catalog.body("heist", &mut rng), "Vault at noon");
        assert_eq!(catalog.duration("heist", &mut rng), 7);
        // built-ins survive
        assert_eq!(catalog.templates["general"].len(), 3);
    }
}
