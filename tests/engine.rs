//! End-to-end coverage of the `Engine` facade: build a tiny graph directly
//! through `GraphModel`'s insert API (standing in for an external loader),
//! hand it a `PlanRoot`, and check the result tuples.

use quadengine::plan::{Aggregate, AggFunc, Atom, BasicGraphPattern, PlanRoot, Term, Where};
use quadengine::Engine;

fn open_fixture(dir: &tempfile::TempDir) -> (Engine, quadengine::ids::ObjectId, quadengine::ids::ObjectId, quadengine::ids::ObjectId, quadengine::ids::ObjectId) {
    let engine = Engine::open(dir.path(), "default").unwrap();
    let model = engine.model();
    let alice = model.intern("alice", false).unwrap();
    let bob = model.intern("bob", false).unwrap();
    let carol = model.intern("carol", false).unwrap();
    let knows = model.intern("knows", true).unwrap();
    model.insert_node(false);
    model.insert_node(false);
    model.insert_node(false);
    model.insert_edge(alice, bob, knows).unwrap();
    model.insert_edge(bob, carol, knows).unwrap();
    (engine, alice, bob, carol, knows)
}

#[test]
fn select_projects_matching_edges() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, alice, bob, _carol, knows) = open_fixture(&dir);

    let root = PlanRoot::Select {
        projection: vec![0],
        distinct: false,
        order_by: vec![],
        limit: None,
        body: Where {
            filter: None,
            pattern: BasicGraphPattern {
                atoms: vec![Atom::Edge { from: Term::Const(alice), to: Term::Var(0), ty: Term::Const(knows), edge_var: None }],
                optional: vec![],
            },
        },
    };
    let rows = engine.execute(&root, 1).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], bob);
}

#[test]
fn group_by_counts_outgoing_edges_per_source() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, alice, bob, _carol, knows) = open_fixture(&dir);

    let root = PlanRoot::GroupBy {
        keys: vec![0],
        aggregates: vec![Aggregate { func: AggFunc::Count, arg: None, output: 2 }],
        body: Where {
            filter: None,
            pattern: BasicGraphPattern {
                atoms: vec![Atom::Edge { from: Term::Var(0), to: Term::Var(1), ty: Term::Const(knows), edge_var: None }],
                optional: vec![],
            },
        },
    };
    let rows = engine.execute(&root, 2).unwrap();
    assert_eq!(rows.len(), 2);
    let counted: std::collections::HashMap<_, _> = rows.into_iter().map(|r| (r[0], r[1])).collect();
    assert!(counted.contains_key(&alice));
    assert!(counted.contains_key(&bob));
}

#[test]
fn distinct_on_select_deduplicates_repeated_bindings() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _alice, _bob, _carol, knows) = open_fixture(&dir);
    let model = engine.model();
    let alice = model.intern("alice", false).unwrap();
    let dave = model.intern("dave", false).unwrap();
    model.insert_edge(alice, dave, knows).unwrap();

    let root = PlanRoot::Distinct {
        body: Box::new(PlanRoot::Select {
            projection: vec![0],
            distinct: false,
            order_by: vec![],
            limit: None,
            body: Where {
                filter: None,
                pattern: BasicGraphPattern {
                    atoms: vec![Atom::Edge { from: Term::Var(0), to: Term::Var(1), ty: Term::Const(knows), edge_var: None }],
                    optional: vec![],
                },
            },
        }),
    };
    let rows = engine.execute(&root, 2).unwrap();
    // alice appears as a source twice (alice->bob, alice->dave); distinct
    // collapses that to a single row.
    let alices = rows.iter().filter(|r| r[0] == alice).count();
    assert_eq!(alices, 1);
}
