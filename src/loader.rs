//! Program loading
//!
//! A load takes named sources. The first one is the entry module; the
//! others are only pulled in when reached through `use "<module>"` or
//! `include "<module>"`, matched by file name or file stem. Declarations of
//! every reached module are merged into one program and lowered together.
//!
//! Errors carry the name of the file they come from.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use tracing::{debug, info, info_span};

use crate::errors::Namel3ssError;
use crate::lexer::{tokenize_with, FastScanner};
use crate::lowering::{ir, lower, LoweringError};
use crate::parser::ast::{self, Decl};
use crate::parser::grammar::select_backend;
use crate::parser::{ParseOptions, ParserBackend};

/// One named source text.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Module name other sources refer to: the file stem.
    pub fn module_name(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }
}

pub struct LoadOptions<'a> {
    /// Accelerated scanner to try before the reference lexer
    pub scanner: Option<&'a dyn FastScanner>,
    pub verify_fast_scan: bool,
    /// Alternate parser; used only when certified against the reference grammar
    pub backend: Option<&'a dyn ParserBackend>,
    pub parse: ParseOptions,
}

impl Default for LoadOptions<'_> {
    fn default() -> Self {
        Self {
            scanner: None,
            verify_fast_scan: true,
            backend: None,
            parse: ParseOptions::default(),
        }
    }
}

/// Load with the reference lexer and parser.
pub fn load_program(sources: &[SourceFile]) -> Result<ir::Program, Namel3ssError> {
    load_with(sources, &LoadOptions::default())
}

/// Tokenize and parse one source.
pub fn parse_file(source: &SourceFile, options: &LoadOptions<'_>) -> Result<ast::Program, Namel3ssError> {
    parse_numbered(source, options, &options.parse)
}

fn parse_numbered(
    source: &SourceFile,
    options: &LoadOptions<'_>,
    parse: &ParseOptions,
) -> Result<ast::Program, Namel3ssError> {
    let tokens = tokenize_with(&source.text, options.scanner, options.verify_fast_scan)
        .map_err(|e| Namel3ssError::from(e).in_file(&source.name))?;
    select_backend(options.backend)
        .parse(&tokens, parse)
        .map_err(|e| Namel3ssError::from(e).in_file(&source.name))
}

pub fn load_with(
    sources: &[SourceFile],
    options: &LoadOptions<'_>,
) -> Result<ir::Program, Namel3ssError> {
    let span = info_span!("program_load", files = sources.len());
    let _guard = span.enter();

    let Some(entry) = sources.first() else {
        return Ok(ir::Program::default());
    };

    let parsed = sources
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let parse = ParseOptions {
                source: index as u32,
                ..options.parse.clone()
            };
            Ok((source, parse_numbered(source, options, &parse)?))
        })
        .collect::<Result<Vec<_>, Namel3ssError>>()?;

    let mut modules: BTreeMap<&str, usize> = BTreeMap::new();
    for (index, (source, _)) in parsed.iter().enumerate() {
        modules.entry(source.name.as_str()).or_insert(index);
        modules.entry(source.module_name()).or_insert(index);
    }

    let order = reachable(&parsed, &modules)?;
    let merged = merge(&parsed, &order)?;

    let program = lower(&merged).map_err(|e| {
        let file = sources.get(e.source() as usize).unwrap_or(entry);
        Namel3ssError::from(e).in_file(&file.name)
    })?;
    info!(
        modules = order.len(),
        flows = program.flows.len(),
        hash = %program.hash(),
        "program loaded"
    );
    Ok(program)
}

/// Indexes of the modules reachable from the entry, in discovery order.
fn reachable(
    parsed: &[(&SourceFile, ast::Program)],
    modules: &BTreeMap<&str, usize>,
) -> Result<Vec<usize>, Namel3ssError> {
    let mut order = vec![0];
    let mut visited = BTreeSet::from([0]);
    let mut queue = VecDeque::from([0]);
    while let Some(index) = queue.pop_front() {
        let (source, program) = &parsed[index];
        for used in program.uses() {
            let Some(&target) = modules.get(used.module.as_str()) else {
                return Err(
                    Namel3ssError::from(LoweringError::unknown("module", &used.module, used.span))
                        .in_file(&source.name),
                );
            };
            if visited.insert(target) {
                debug!(from = %source.name, module = %used.module, "module resolved");
                order.push(target);
                queue.push_back(target);
            }
        }
    }
    Ok(order)
}

/// One program holding the declarations of every reached module. Only the
/// entry module's `use` lines are kept.
fn merge(
    parsed: &[(&SourceFile, ast::Program)],
    order: &[usize],
) -> Result<ast::Program, Namel3ssError> {
    let mut merged = ast::Program {
        spec_version: parsed[0].1.spec_version.clone(),
        declarations: Vec::new(),
    };
    let mut owners: BTreeSet<(&str, &str)> = BTreeSet::new();
    for &index in order {
        let (source, program) = &parsed[index];
        for decl in &program.declarations {
            if let Decl::Use(_) = decl {
                if index != 0 {
                    continue;
                }
            } else {
                let (what, name) = decl.key();
                if !owners.insert((what, name)) {
                    return Err(Namel3ssError::from(LoweringError::duplicate(
                        what,
                        name,
                        decl.span(),
                    ))
                    .in_file(&source.name));
                }
            }
            merged.declarations.push(decl.clone());
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Token;
    use crate::parser::ParseResult;

    fn files(pairs: &[(&str, &str)]) -> Vec<SourceFile> {
        pairs.iter().map(|(n, t)| SourceFile::new(*n, *t)).collect()
    }

    #[test]
    fn test_module_name_is_file_stem() {
        assert_eq!(SourceFile::new("lib/inventory.ai", "").module_name(), "inventory");
        assert_eq!(SourceFile::new("plain", "").module_name(), "plain");
    }

    #[test]
    fn test_single_file() {
        let program = load_program(&files(&[("app.ai", "flow \"demo\":\n  return \"ok\"\n")])).unwrap();
        assert!(program.flow("demo").is_some());
    }

    #[test]
    fn test_use_pulls_in_modules() {
        let sources = files(&[
            ("app.ai", "use \"inventory\"\nflow \"demo\":\n  return 1\n"),
            ("inventory.ai", "include \"shared\"\nrecord \"Item\":\n  sku text\n"),
            ("shared.ai", "alias \"Money\" is number\n"),
            ("unused.ai", "flow \"other\":\n  return 2\n"),
        ]);
        let program = load_program(&sources).unwrap();
        assert!(program.records.contains_key("Item"));
        assert!(program.aliases.contains_key("Money"));
        assert!(program.flow("other").is_none());
        assert_eq!(program.modules, vec!["inventory".to_string()]);
    }

    #[test]
    fn test_cyclic_uses_load_once() {
        let sources = files(&[
            ("a.ai", "use \"b\"\nflow \"demo\":\n  return 1\n"),
            ("b.ai", "use \"a\"\nrecord \"Item\":\n  sku text\n"),
        ]);
        let program = load_program(&sources).unwrap();
        assert_eq!(program.flows.len(), 1);
        assert_eq!(program.records.len(), 1);
    }

    #[test]
    fn test_unknown_module() {
        let err = load_program(&files(&[("app.ai", "use \"missing\"\n")])).unwrap_err();
        let diagnostic = err.diagnostic();
        assert_eq!(diagnostic.error_id, "lowering.unknown_reference");
        assert_eq!(diagnostic.file.as_deref(), Some("app.ai"));
        assert_eq!(diagnostic.line, Some(1));
    }

    #[test]
    fn test_duplicate_across_files_names_second_file() {
        let sources = files(&[
            ("app.ai", "use \"extra\"\nflow \"demo\":\n  return 1\n"),
            ("extra.ai", "flow \"demo\":\n  return 2\n"),
        ]);
        let diagnostic = load_program(&sources).unwrap_err().diagnostic();
        assert_eq!(diagnostic.error_id, "lowering.duplicate_declaration");
        assert_eq!(diagnostic.file.as_deref(), Some("extra.ai"));
    }

    #[test]
    fn test_lowering_errors_name_the_module_they_come_from() {
        let sources = files(&[
            ("app.ai", "use \"stock\"\nflow \"demo\":\n  return 1\n"),
            ("stock.ai", "flow \"restock\":\n  save \"Missing\" with {sku: \"a\"}\n"),
        ]);
        let diagnostic = load_program(&sources).unwrap_err().diagnostic();
        assert_eq!(diagnostic.error_id, "lowering.unknown_reference");
        assert_eq!(diagnostic.file.as_deref(), Some("stock.ai"));
        assert_eq!(diagnostic.line, Some(2));
    }

    #[test]
    fn test_source_indexes_stay_out_of_the_hash() {
        let flow = "flow \"demo\":\n  return 1\n";
        let alone = load_program(&files(&[("demo.ai", flow)])).unwrap();
        let used = load_program(&files(&[
            ("app.ai", "use \"demo\"\n"),
            ("demo.ai", flow),
        ]))
        .unwrap();
        assert_eq!(
            serde_json::to_value(&used.flows["demo"]).unwrap(),
            serde_json::to_value(&alone.flows["demo"]).unwrap()
        );
    }

    #[test]
    fn test_parse_errors_carry_file() {
        let sources = files(&[("broken.ai", "flow \"f\":\n  let flow is 1\n")]);
        let diagnostic = load_program(&sources).unwrap_err().diagnostic();
        assert_eq!(diagnostic.error_id, "parse.reserved_identifier");
        assert_eq!(diagnostic.file.as_deref(), Some("broken.ai"));
    }

    struct EmptyScanner;

    impl FastScanner for EmptyScanner {
        fn name(&self) -> &str {
            "empty"
        }

        fn scan(&self, _source: &str) -> Option<Vec<Token>> {
            Some(Vec::new())
        }
    }

    struct Uncertified;

    impl ParserBackend for Uncertified {
        fn name(&self) -> &str {
            "uncertified"
        }

        fn grammar_hash(&self) -> &str {
            "0000"
        }

        fn parse(&self, _tokens: &[Token], _options: &ParseOptions) -> ParseResult<ast::Program> {
            Ok(ast::Program {
                spec_version: None,
                declarations: Vec::new(),
            })
        }
    }

    #[test]
    fn test_falls_back_to_reference_implementations() {
        let sources = files(&[("app.ai", "flow \"demo\":\n  return 1\n")]);
        let options = LoadOptions {
            scanner: Some(&EmptyScanner),
            backend: Some(&Uncertified),
            ..LoadOptions::default()
        };
        let program = load_with(&sources, &options).unwrap();
        assert!(program.flow("demo").is_some());
    }
}
