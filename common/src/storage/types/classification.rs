use serde::{Deserialize, Serialize};

/// Broad category of a source document, derived from where it lives in the
/// library tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentKind {
    Rulebook,
    Adventure,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Rulebook => "rulebook",
            DocumentKind::Adventure => "adventure",
        }
    }
}

/// Directory-segment convention for the library tree: the first segment of a
/// file's relative directory names the ruleset, and a later `adventures`
/// segment marks adventure modules. Files at the library root fall into the
/// `unsorted` ruleset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceClassification {
    pub ruleset_tag: String,
    pub document_kind: DocumentKind,
}

impl SourceClassification {
    pub fn from_relative_dir(relative_dir: &str) -> Self {
        let mut segments = relative_dir
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty() && *segment != ".");

        let ruleset_tag = segments
            .next()
            .map_or_else(|| "unsorted".to_string(), str::to_lowercase);

        let document_kind = if relative_dir
            .split(['/', '\\'])
            .any(|segment| segment.eq_ignore_ascii_case("adventures"))
        {
            DocumentKind::Adventure
        } else {
            DocumentKind::Rulebook
        };

        SourceClassification {
            ruleset_tag,
            document_kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_segment_names_the_ruleset() {
        let c = SourceClassification::from_relative_dir("5e/core");
        assert_eq!(c.ruleset_tag, "5e");
        assert_eq!(c.document_kind, DocumentKind::Rulebook);
    }

    #[test]
    fn adventures_segment_marks_adventures() {
        let c = SourceClassification::from_relative_dir("5e/adventures/curse");
        assert_eq!(c.ruleset_tag, "5e");
        assert_eq!(c.document_kind, DocumentKind::Adventure);
    }

    #[test]
    fn root_files_are_unsorted_rulebooks() {
        let c = SourceClassification::from_relative_dir("");
        assert_eq!(c.ruleset_tag, "unsorted");
        assert_eq!(c.document_kind, DocumentKind::Rulebook);
    }
}
