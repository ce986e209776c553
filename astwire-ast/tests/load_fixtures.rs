use std::collections::BTreeSet;
use std::path::PathBuf;

use astwire_ast::{from_value, AstFile, Document, LinkError, LoadError, Node, NodeKind};
use serde_json::Value;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn fixture(name: &str) -> Value {
    let text = std::fs::read_to_string(fixture_path(name)).expect("fixture should exist");
    serde_json::from_str(&text).expect("fixture should be valid JSON")
}

/// Body fields that hold plain numbers rather than indices.
const SCALAR_FIELDS: &[&str] = &["bit_size", "tmp_var"];

/// Fields whose capability admits a program node.
const ADMITS_PROGRAM: &[&str] = &["elements", "calls", "els", "then", "import_desc"];

const SCOPE_FIELDS: &[&str] = &["global_scope", "scope"];

/// Every (node, field, position) holding an index, from the raw JSON.
fn reference_sites(doc: &Value) -> Vec<(usize, String, Option<usize>)> {
    let mut sites = Vec::new();
    for (index, node) in doc["node"].as_array().unwrap().iter().enumerate() {
        let Some(body) = node["body"].as_object() else {
            continue;
        };
        for (field, value) in body {
            if SCALAR_FIELDS.contains(&field.as_str()) {
                continue;
            }
            match value {
                Value::Number(_) => sites.push((index, field.clone(), None)),
                Value::Array(items) => {
                    for position in 0..items.len() {
                        sites.push((index, field.clone(), Some(position)));
                    }
                }
                _ => {}
            }
        }
    }
    sites
}

fn set_site(doc: &mut Value, site: &(usize, String, Option<usize>), to: u64) {
    let (index, field, position) = site;
    let slot = &mut doc["node"][*index]["body"][field.as_str()];
    match position {
        Some(position) => slot[*position] = Value::from(to),
        None => *slot = Value::from(to),
    }
}

#[test]
fn test_all_kinds_document_loads() {
    let ast = from_value(fixture("all_kinds.json")).expect("should load all_kinds.json");
    assert_eq!(ast.nodes().len(), 53);
    assert_eq!(ast.scopes().len(), 7);

    let seen: BTreeSet<NodeKind> = ast.nodes().iter().map(Node::kind).collect();
    let all: BTreeSet<NodeKind> = NodeKind::ALL.iter().copied().collect();
    assert_eq!(seen, all, "fixture should cover every node kind");
}

#[test]
fn test_references_point_at_original_indices() {
    let ast = from_value(fixture("all_kinds.json")).unwrap();

    let Some(Node::Format(format)) = ast.node(ast.program().elements[0]) else {
        panic!("element 0 should be a format");
    };
    assert_eq!(format.ident.index(), 2);
    assert_eq!(format.body.index(), 3);
    assert_eq!(format.scope, ast.scope_id(1));
    assert_eq!(ast.get(format.ident).unwrap().ident, "Header");

    let Some(Node::IdentType(ident_type)) = ast.nodes().get(9) else {
        panic!("node 9 should be an ident_type");
    };
    assert_eq!(ident_type.base.map(|b| b.index()), Some(1));

    let Some(Node::Ident(reference)) = ast.nodes().get(18) else {
        panic!("node 18 should be an ident");
    };
    assert_eq!(reference.base.map(|b| b.index()), Some(7));
    assert_eq!(reference.expr_type.map(|t| t.index()), Some(8));

    let scope = &ast.scopes()[3];
    assert_eq!(scope.prev.map(|s| s.index()), Some(2));
    assert_eq!(scope.next.map(|s| s.index()), Some(4));
    assert_eq!(ast.scopes()[2].branch.map(|s| s.index()), Some(3));
}

#[test]
fn test_absent_types_are_preserved() {
    let ast = from_value(fixture("all_kinds.json")).unwrap();
    // a declaring ident before type checking
    assert!(ast.nodes()[2].expr_type().is_none());
    assert_eq!(ast.nodes()[7].expr_type().map(|t| t.index()), Some(8));
    assert!(ast.nodes()[8].expr_type().is_none());
}

#[test]
fn test_reserialized_document_reloads_identically() {
    let ast = from_value(fixture("all_kinds.json")).unwrap();
    let document = ast.to_document().unwrap();
    let reloaded = astwire_ast::load(document.clone()).unwrap();
    assert_eq!(ast, reloaded);

    let again = reloaded.to_document().unwrap();
    assert_eq!(document, again);

    let text = ast.to_json().unwrap();
    let parsed: Document = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, document);
}

#[test]
fn test_any_out_of_range_index_fails_the_load() {
    let doc = fixture("all_kinds.json");
    let sites = reference_sites(&doc);
    assert!(sites.len() > 80, "expected many reference sites");

    for site in &sites {
        let mut mutated = doc.clone();
        set_site(&mut mutated, site, 1_000);
        let err = from_value(mutated).expect_err(&format!("{:?} should fail", site));
        assert!(
            matches!(err.link_errors(), [LinkError::OutOfRange { target: 1_000, .. }]),
            "{:?}: unexpected {}",
            site,
            err
        );
    }
}

#[test]
fn test_any_capability_violation_fails_the_load() {
    let doc = fixture("all_kinds.json");
    for site in reference_sites(&doc) {
        let field = site.1.as_str();
        if ADMITS_PROGRAM.contains(&field) || SCOPE_FIELDS.contains(&field) {
            continue;
        }
        let mut mutated = doc.clone();
        set_site(&mut mutated, &site, 0);
        let err = from_value(mutated).expect_err(&format!("{:?} should fail", site));
        match err.link_errors() {
            [LinkError::KindMismatch {
                field: reported,
                found: NodeKind::Program,
                target: 0,
                ..
            }] => assert_eq!(*reported, field),
            other => panic!("{:?}: unexpected {:?}", site, other),
        }
    }
}

#[test]
fn test_scope_objects_reject_non_declarations() {
    let mut doc = fixture("all_kinds.json");
    doc["scope"][1]["objects"][0] = Value::from(10);
    let err = from_value(doc).unwrap_err();
    assert_eq!(
        err.to_string(),
        "scope 1: field `objects` expects object, found int_literal at node 10"
    );
}

#[test]
fn test_walk_visits_each_reachable_node_once() {
    let ast = from_value(fixture("all_kinds.json")).unwrap();
    let reached = ast.reachable_from(ast.root());
    let unique: BTreeSet<usize> = reached.iter().map(|id| id.index()).collect();
    assert_eq!(unique.len(), reached.len());
    assert_eq!(reached[0].index(), 0);
    // the imported program is reached through the import node
    assert!(unique.contains(&52));
    // array and union types are only declared, never referenced
    assert!(!unique.contains(&50));
    assert!(!unique.contains(&51));
}

#[test]
fn test_lookup_walks_enclosing_scopes() {
    let ast = from_value(fixture("all_kinds.json")).unwrap();
    let function_scope = ast.scope_id(2).unwrap();
    let header = ast.lookup(function_scope, "Header").expect("visible from global");
    assert_eq!(header.index(), 1);
    assert_eq!(ast.identifier(header), Some("Header"));
    assert!(ast.lookup(function_scope, "len").is_none());
}

#[test]
fn test_minimal_fixture_names() {
    let ast = from_value(fixture("minimal.json")).unwrap();
    let Some(Node::Field(field)) = ast.nodes().get(4) else {
        panic!("node 4 should be a field");
    };
    let ident = ast.get(field.ident.unwrap()).unwrap();
    assert_eq!(ident.ident, "x");
    assert_eq!(field.belong.map(|b| b.index()), Some(1));
}

#[test]
fn test_parser_output_with_nested_locations() {
    let text = std::fs::read_to_string(fixture_path("parser_output.json")).unwrap();
    let file = AstFile::parse(&text).unwrap();
    assert!(file.error.is_none());
    let ast = file.into_ast().unwrap();
    assert_eq!(ast.nodes()[3].kind(), NodeKind::StrLiteral);
    assert_eq!(ast.nodes()[3].loc().begin, 4);
    assert_eq!(ast.nodes()[3].loc().end, 12);
}

#[test]
fn test_malformed_json_is_document_error() {
    assert!(matches!(
        astwire_ast::from_str("{\"node\": [}"),
        Err(LoadError::Document(_))
    ));
}
