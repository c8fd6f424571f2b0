//! Type alias normalization
//!
//! User aliases may point at built-in names or at other aliases. Every
//! reference resolves to exactly one [`BaseType`]; chains are followed and
//! cycles rejected.

use std::collections::BTreeMap;

use super::LoweringError;
use crate::parser::ast::{AliasDecl, Span, TypeRef};
use crate::schema::BaseType;

#[derive(Debug, Default)]
pub struct TypeAliasTable {
    aliases: BTreeMap<String, TypeRef>,
    spans: BTreeMap<String, Span>,
}

impl TypeAliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, alias: &AliasDecl) -> Result<(), LoweringError> {
        if BaseType::from_builtin(&alias.name).is_some() {
            return Err(LoweringError::invalid_type(
                &alias.name,
                format!("Cannot redefine built-in type '{}'", alias.name),
                alias.span,
            ));
        }
        if self.aliases.contains_key(&alias.name) {
            return Err(LoweringError::duplicate("type alias", &alias.name, alias.span));
        }
        self.aliases.insert(alias.name.clone(), alias.target.clone());
        self.spans.insert(alias.name.clone(), alias.span);
        Ok(())
    }

    pub fn resolve(&self, type_ref: &TypeRef) -> Result<BaseType, LoweringError> {
        let mut chain: Vec<&str> = Vec::new();
        let mut current = type_ref;
        loop {
            if let Some(base) = BaseType::from_builtin(&current.name) {
                return Ok(base);
            }
            let Some(next) = self.aliases.get(&current.name) else {
                return Err(LoweringError::unknown("type", &current.name, current.span));
            };
            if chain.contains(&current.name.as_str()) {
                chain.push(&current.name);
                let span = self.spans.get(chain[0]).copied().unwrap_or(type_ref.span);
                return Err(LoweringError::invalid_type(
                    chain[0],
                    format!("Type alias cycle: {}", chain.join(" -> ")),
                    span,
                ));
            }
            chain.push(&current.name);
            current = next;
        }
    }

    /// Every alias with its resolved base type.
    pub fn resolved(&self) -> Result<BTreeMap<String, BaseType>, LoweringError> {
        let mut out = BTreeMap::new();
        for (name, span) in &self.spans {
            let base = self.resolve(&TypeRef {
                name: name.clone(),
                span: *span,
            })?;
            out.insert(name.clone(), base);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias(name: &str, target: &str, line: u32) -> AliasDecl {
        AliasDecl {
            name: name.to_string(),
            target: TypeRef {
                name: target.to_string(),
                span: Span::new(line, 10),
            },
            span: Span::new(line, 1),
        }
    }

    fn type_ref(name: &str) -> TypeRef {
        TypeRef {
            name: name.to_string(),
            span: Span::new(9, 9),
        }
    }

    #[test]
    fn test_chains_resolve_to_base() {
        let mut table = TypeAliasTable::new();
        table.declare(&alias("Money", "Amount", 1)).unwrap();
        table.declare(&alias("Amount", "integer", 2)).unwrap();
        assert_eq!(table.resolve(&type_ref("Money")).unwrap(), BaseType::Int);
        assert_eq!(table.resolve(&type_ref("str")).unwrap(), BaseType::Text);
        assert_eq!(table.resolved().unwrap().len(), 2);
    }

    #[test]
    fn test_cycles_and_unknown_targets() {
        let mut table = TypeAliasTable::new();
        table.declare(&alias("A", "B", 1)).unwrap();
        table.declare(&alias("B", "A", 2)).unwrap();
        let err = table.resolve(&type_ref("A")).unwrap_err();
        assert_eq!(err.error_id(), "lowering.invalid_type");
        assert!(err.to_string().contains("A -> B -> A"));

        let err = table.resolve(&type_ref("Missing")).unwrap_err();
        assert!(matches!(err, LoweringError::UnknownReference { ref what, .. } if what == "type"));
    }

    #[test]
    fn test_builtin_names_cannot_be_aliased() {
        let mut table = TypeAliasTable::new();
        assert!(table.declare(&alias("text", "number", 1)).is_err());
        table.declare(&alias("Money", "number", 1)).unwrap();
        assert!(matches!(
            table.declare(&alias("Money", "int", 2)),
            Err(LoweringError::DuplicateDeclaration { .. })
        ));
    }
}
