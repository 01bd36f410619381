use super::{EpicParser, GenericParser, OnTheSnowParser, ParserKind, SnowParser};
use crate::models::Resort;
use url::Url;

/// Decides whether a resort publishes with a given site template.
///
/// An explicit `chain` on the resort is authoritative. Without one, a
/// built-in member name or a candidate URL on one of the template's hosts
/// is enough.
#[derive(Debug, Clone)]
pub struct ChainMatcher {
    pub chain: &'static str,
    pub members: &'static [&'static str],
    pub hosts: &'static [&'static str],
}

impl ChainMatcher {
    pub fn matches(&self, resort: &Resort) -> bool {
        if let Some(chain) = resort.chain.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            return chain.eq_ignore_ascii_case(self.chain);
        }

        let name = resort.name.trim();
        if self.members.iter().any(|m| m.eq_ignore_ascii_case(name)) {
            return true;
        }

        resort
            .candidate_urls()
            .iter()
            .filter_map(|u| Url::parse(u).ok())
            .filter_map(|u| u.host_str().map(str::to_ascii_lowercase))
            .any(|host| {
                self.hosts
                    .iter()
                    .any(|h| host == *h || host.ends_with(&format!(".{h}")))
            })
    }
}

/// Ordered set of parsers. Registration order is run order within a tier.
#[derive(Default)]
pub struct ParserRegistry {
    parsers: Vec<Box<dyn SnowParser>>,
}

impl ParserRegistry {
    /// Epic and OnTheSnow templates plus the generic fallback.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry
            .register(EpicParser::default())
            .register(OnTheSnowParser::default())
            .register(GenericParser);
        registry
    }

    pub fn register(&mut self, parser: impl SnowParser + 'static) -> &mut Self {
        self.parsers.push(Box::new(parser));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }

    /// Parsers to run for `resort`: applicable specialized ones first, then
    /// the generic ones.
    pub fn resolve(&self, resort: &Resort) -> Vec<&dyn SnowParser> {
        let applicable = |kind: ParserKind| {
            self.parsers
                .iter()
                .filter(move |p| p.kind() == kind && p.applies_to(resort))
                .map(|p| p.as_ref())
        };

        applicable(ParserKind::Specialized)
            .chain(applicable(ParserKind::Generic))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Document;
    use crate::models::PartialSnowReport;
    use crate::registry::resort;

    fn names(parsers: &[&dyn SnowParser]) -> Vec<&'static str> {
        parsers.iter().map(|p| p.name()).collect()
    }

    #[test]
    fn test_unaffiliated_resort_gets_generic_only() {
        let registry = ParserRegistry::with_defaults();
        let zermatt = resort("Zermatt", "Switzerland", None);
        assert_eq!(names(&registry.resolve(&zermatt)), vec!["generic"]);
    }

    #[test]
    fn test_member_name_selects_epic() {
        let registry = ParserRegistry::with_defaults();
        let vail = resort("Vail", "USA", None);
        assert_eq!(names(&registry.resolve(&vail)), vec!["epic", "generic"]);
    }

    #[test]
    fn test_explicit_chain_overrides_member_list() {
        let registry = ParserRegistry::with_defaults();
        let stowe = Resort {
            chain: Some("onthesnow".into()),
            ..resort("Stowe", "USA", None)
        };
        assert_eq!(names(&registry.resolve(&stowe)), vec!["onthesnow", "generic"]);
    }

    #[test]
    fn test_host_suffix_match() {
        let matcher = ChainMatcher {
            chain: "onthesnow",
            members: &[],
            hosts: &["onthesnow.com"],
        };
        let hit = resort("Jackson Hole", "USA", Some("https://www.onthesnow.com/wyoming/jackson-hole"));
        let miss = resort("Aspen", "USA", Some("https://notonthesnow.com/aspen"));
        assert!(matcher.matches(&hit));
        assert!(!matcher.matches(&miss));
    }

    struct Fixed(&'static str, ParserKind);

    impl SnowParser for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }
        fn kind(&self) -> ParserKind {
            self.1
        }
        fn extract(&self, _doc: &Document) -> PartialSnowReport {
            PartialSnowReport::default()
        }
    }

    #[test]
    fn test_specialized_always_precede_generic() {
        let mut registry = ParserRegistry::default();
        registry
            .register(Fixed("fallback", ParserKind::Generic))
            .register(Fixed("a", ParserKind::Specialized))
            .register(Fixed("b", ParserKind::Specialized));
        let any = resort("Anywhere", "USA", None);
        assert_eq!(names(&registry.resolve(&any)), vec!["a", "b", "fallback"]);
        assert_eq!(registry.names(), vec!["fallback", "a", "b"]);
    }
}
