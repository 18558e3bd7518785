use crate::error::{EnrichError, Result};
use crate::record_store::Field;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Element locator evaluated against a loaded detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locator {
    Xpath(String),
    Css(String),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Xpath(x) => write!(f, "xpath:{}", x),
            Locator::Css(c) => write!(f, "css:{}", c),
        }
    }
}

/// A loaded page that locators can be evaluated against.
pub trait Document {
    /// Visible text of the first element matching `locator`.
    /// `Ok(None)` means nothing matched; `Err` is reserved for the
    /// transport underneath failing.
    fn find_text(&self, locator: &Locator) -> Result<Option<String>>;

    fn title(&self) -> Option<String> {
        None
    }
}

/// Ordered locators per enrichment field. Earlier rules win.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRules {
    #[serde(rename = "abstract")]
    pub abstract_rules: Vec<Locator>,
    #[serde(rename = "claim1")]
    pub claim1_rules: Vec<Locator>,
    /// Polled after navigation until present; `null` in a rule file disables the wait.
    #[serde(default = "default_ready")]
    pub ready: Option<Locator>,
}

fn default_ready() -> Option<Locator> {
    Some(Locator::Css("section#abstract, section[itemprop='abstract'], section#claims, section[itemprop='claims']".into()))
}

impl ExtractionRules {
    pub fn for_field(&self, field: Field) -> &[Locator] {
        match field {
            Field::Abstract => &self.abstract_rules,
            Field::Claim1 => &self.claim1_rules,
        }
    }

    /// Loads a rule file shaped like `{"abstract": [{"xpath": ".."}], "claim1": [..]}`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EnrichError::Config(format!("cannot read rules {:?}: {}", path, e)))?;
        let rules: ExtractionRules = serde_json::from_str(&raw)
            .map_err(|e| EnrichError::Config(format!("cannot parse rules {:?}: {}", path, e)))?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn validate(&self) -> Result<()> {
        for field in Field::ALL {
            let rules = self.for_field(field);
            if rules.is_empty() {
                return Err(EnrichError::Config(format!("no locators for '{}'", field.column())));
            }
            if let Some(bad) = rules.iter().find(|l| match l {
                Locator::Xpath(s) | Locator::Css(s) => s.trim().is_empty(),
            }) {
                return Err(EnrichError::Config(format!("empty locator {} for '{}'", bad, field.column())));
            }
        }
        Ok(())
    }
}

impl Default for ExtractionRules {
    /// Patent detail page locators: the rendered app structure first, then
    /// the server-rendered markup the page falls back to.
    fn default() -> Self {
        ExtractionRules {
            abstract_rules: vec![
                Locator::Xpath("/html/body/search-app/search-result/search-ui/div/div/div/div/div/result-container/patent-result/div/div/div/div[1]/div[1]/section[1]/patent-text".into()),
                Locator::Css("section#abstract patent-text".into()),
                Locator::Css("section[itemprop='abstract'] div.abstract".into()),
                Locator::Css("div.abstract".into()),
            ],
            claim1_rules: vec![
                Locator::Xpath("/html/body/search-app/search-result/search-ui/div/div/div/div/div/result-container/patent-result/div/div/div/div[2]/div[2]/section/patent-text/div".into()),
                Locator::Css("section#claims patent-text div.claim".into()),
                Locator::Css("section[itemprop='claims'] div.claim[num='00001']".into()),
                Locator::Css("div.claim".into()),
            ],
            ready: default_ready(),
        }
    }
}

/// Returns the trimmed text of the first rule yielding non-blank text, or
/// an empty string when every rule misses.
pub fn extract<D: Document + ?Sized>(doc: &D, rules: &[Locator]) -> Result<String> {
    for rule in rules {
        match doc.find_text(rule)? {
            Some(text) if !text.trim().is_empty() => {
                debug!("Matched {}", rule);
                return Ok(text.trim().to_string());
            }
            Some(_) => debug!("Blank text at {}", rule),
            None => debug!("No element at {}", rule),
        }
    }
    Ok(String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeDoc {
        hits: HashMap<String, String>,
        fail_on: Option<String>,
        asked: RefCell<Vec<String>>,
    }

    impl FakeDoc {
        fn with(mut self, locator: &Locator, text: &str) -> Self {
            self.hits.insert(locator.to_string(), text.to_string());
            self
        }
    }

    impl Document for FakeDoc {
        fn find_text(&self, locator: &Locator) -> Result<Option<String>> {
            let key = locator.to_string();
            self.asked.borrow_mut().push(key.clone());
            if self.fail_on.as_deref() == Some(key.as_str()) {
                return Err(EnrichError::navigation("https://x", "socket closed"));
            }
            Ok(self.hits.get(&key).cloned())
        }
    }

    fn css(s: &str) -> Locator {
        Locator::Css(s.into())
    }

    #[test]
    fn falls_through_to_second_rule() {
        let r1 = css("#new");
        let r2 = Locator::Xpath("//old".into());
        let doc = FakeDoc::default().with(&r2, "text");
        assert_eq!(extract(&doc, &[r1, r2]).unwrap(), "text");
    }

    #[test]
    fn whitespace_only_match_yields_empty() {
        let r1 = css("#new");
        let doc = FakeDoc::default().with(&r1, "  \n ");
        assert_eq!(extract(&doc, &[r1]).unwrap(), "");
    }

    #[test]
    fn first_match_short_circuits() {
        let r1 = css("#a");
        let r2 = css("#b");
        let doc = FakeDoc::default().with(&r1, " first ").with(&r2, "second");
        assert_eq!(extract(&doc, &[r1.clone(), r2]).unwrap(), "first");
        assert_eq!(*doc.asked.borrow(), vec![r1.to_string()]);
    }

    #[test]
    fn exhausted_rules_yield_empty() {
        let doc = FakeDoc::default();
        assert_eq!(extract(&doc, &[css("#a"), css("#b")]).unwrap(), "");
        assert_eq!(extract(&doc, &[]).unwrap(), "");
    }

    #[test]
    fn transport_failure_propagates() {
        let r1 = css("#a");
        let doc = FakeDoc {
            fail_on: Some(r1.to_string()),
            ..FakeDoc::default()
        };
        let err = extract(&doc, &[r1]).unwrap_err();
        assert!(matches!(err, EnrichError::Navigation { .. }));
    }

    #[test]
    fn rules_parse_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{"abstract": [{"css": "div.abstract"}], "claim1": [{"xpath": "//div[@num='00001']"}, {"css": "div.claim"}]}"#,
        )
        .unwrap();
        let rules = ExtractionRules::from_json_file(&path).unwrap();
        assert_eq!(rules.for_field(Field::Abstract), [css("div.abstract")]);
        assert_eq!(rules.for_field(Field::Claim1).len(), 2);
        assert_eq!(rules.ready, ExtractionRules::default().ready);
    }

    #[test]
    fn ready_locator_is_relative_and_can_be_disabled() {
        let ready = ExtractionRules::default().ready.unwrap();
        assert!(matches!(&ready, Locator::Css(s) if s.contains("section#abstract")));

        let rules: ExtractionRules =
            serde_json::from_str(r#"{"abstract": [{"css": "a"}], "claim1": [{"css": "b"}], "ready": null}"#).unwrap();
        assert_eq!(rules.ready, None);
    }

    #[test]
    fn empty_rule_list_is_rejected() {
        let rules = ExtractionRules {
            abstract_rules: vec![],
            claim1_rules: vec![css("div.claim")],
            ready: None,
        };
        assert!(matches!(rules.validate(), Err(EnrichError::Config(_))));
        assert!(ExtractionRules::default().validate().is_ok());
    }
}
