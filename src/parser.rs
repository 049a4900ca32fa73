//! The source-parser collaborator (§6) and the Symbol Extractor (C3) that
//! shapes its output into the SST schema.
//!
//! Design note §9 forbids regex-based syntax scraping for type extraction
//! (the source implementation's approach); this module instead depends on
//! a typed parser trait returning structured syntax nodes, and the
//! Extractor does nothing but reshape those nodes.

use serde::{Deserialize, Serialize};

use crate::blackboard::atom::{AtomContract, AtomKind, MemberSignature, TypeKind, TypeSignature};

/// One top-level type declaration as seen by the source parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedType {
    pub name: String,
    pub kind: TypeKind,
    pub members: Vec<ParsedMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedMember {
    pub name: String,
    pub signature: String,
}

/// The syntax summary a source parser returns: enough to enumerate
/// top-level declarations, their members, and what the file imports -
/// never full bodies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyntaxSummary {
    pub types: Vec<ParsedType>,
    pub imports: Vec<String>,
    /// Simple names referenced in expression position anywhere in the
    /// file, used to populate `AtomContract::referenced_types` for
    /// implementation atoms.
    pub referenced_names: Vec<String>,
}

/// Given a source string, returns a syntax summary sufficient to
/// enumerate top-level type declarations, their members and signatures,
/// and import directives (§6).
pub trait SourceParser: Send + Sync {
    fn parse(&self, source: &str) -> crate::error::Result<SyntaxSummary>;
}

/// Shapes a parser's syntax summary into the Blackboard's contract
/// schema, per atom kind (§4.3):
/// - `interface`/`abstraction`: every member signature is captured.
/// - `data-shape`: every field/property and its type.
/// - `implementation`: defined types plus referenced external names.
pub struct SymbolExtractor<'a, P: SourceParser> {
    parser: &'a P,
}

impl<'a, P: SourceParser> SymbolExtractor<'a, P> {
    pub fn new(parser: &'a P) -> Self {
        Self { parser }
    }

    pub fn extract(
        &self,
        source: &str,
        kind: AtomKind,
        namespace: &str,
    ) -> crate::error::Result<AtomContract> {
        let summary = self.parser.parse(source)?;

        let defined_types = summary
            .types
            .into_iter()
            .map(|t| TypeSignature {
                fully_qualified_name: format!("{namespace}.{}", t.name),
                simple_name: t.name,
                kind: t.kind,
                members: t
                    .members
                    .into_iter()
                    .map(|m| MemberSignature {
                        name: m.name,
                        signature: m.signature,
                    })
                    .collect(),
            })
            .collect();

        let referenced_types = match kind {
            AtomKind::Implementation | AtomKind::Test => summary.referenced_names,
            // Interfaces, abstractions, and data-shapes expose their own
            // contract only - they are not expected to reference others.
            AtomKind::Interface | AtomKind::Abstraction | AtomKind::DataShape => Vec::new(),
        };

        Ok(AtomContract {
            defined_types,
            referenced_types,
        })
    }
}
