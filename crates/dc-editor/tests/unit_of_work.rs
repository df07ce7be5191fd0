//! Integration tests: units of work over a document (dc-editor ↔ dc-core).
//!
//! Exercises structural edits through the built-in specifications, commit
//! ordering, events and rollback across the crate boundary.

use dc_core::crdt::ChangeOrigin;
use dc_core::*;
use dc_editor::*;
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::rc::Rc;

fn id(s: &str) -> ElementId {
    ElementId::intern(s)
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One layer holding two connected boxes and a stylesheet used by both.
fn flowchart() -> Diagram {
    let mut d = Diagram::new(id("fc"), "Flowchart");
    let mut layer = Layer::new(id("fc_layer"), "Main");
    layer.elements = vec![id("fc_start"), id("fc_end"), id("fc_link")];
    d.insert_layer(layer).unwrap();
    d.insert_stylesheet(Stylesheet::new(id("fc_style"), StylesheetKind::Node, "Box"))
        .unwrap();

    let mut start = DiagramNode::new(id("fc_start"), "rect", id("fc_layer"), Bounds::new(0.0, 0.0, 100.0, 40.0));
    start.style = Some(id("fc_style"));
    d.insert_node(start).unwrap();
    let mut end = DiagramNode::new(id("fc_end"), "rect", id("fc_layer"), Bounds::new(0.0, 200.0, 100.0, 40.0));
    end.style = Some(id("fc_style"));
    d.insert_node(end).unwrap();

    d.insert_edge(DiagramEdge::new(
        id("fc_link"),
        id("fc_layer"),
        Endpoint::Connected {
            node: id("fc_start"),
            anchor: "south".into(),
        },
        Endpoint::Connected {
            node: id("fc_end"),
            anchor: "north".into(),
        },
    ))
    .unwrap();

    let root = d.root_mut();
    root.layers = vec![id("fc_layer")];
    root.stylesheets = vec![id("fc_style")];
    root.active_layer = Some(id("fc_layer"));
    d
}

fn recorder(doc: &mut Document) -> Rc<RefCell<Vec<DocumentEvent>>> {
    let seen: Rc<RefCell<Vec<DocumentEvent>>> = Rc::default();
    let sink = Rc::clone(&seen);
    doc.subscribe(move |e| sink.borrow_mut().push(e.clone()));
    seen
}

// ─── Tracking ────────────────────────────────────────────────────────────

#[test]
fn repeated_touches_keep_first_before_state() {
    init_logging();
    let mut doc = Document::offline(flowchart()).unwrap();
    let set = {
        let mut uow = UnitOfWork::new(&mut doc);
        for step in 1..=3 {
            uow.mutate_node(id("fc_start"), |n| n.bounds.x = f64::from(step) * 10.0)
                .unwrap();
        }
        assert_eq!(uow.dirty().len(), 1);
        uow.commit().unwrap()
    };
    let pair = set.get(TrackableRef::node(id("fc_start"))).unwrap();
    let (Some(Snapshot::Node(before)), Some(Snapshot::Node(after))) = (&pair.before, &pair.after) else {
        panic!("expected node snapshots, got {pair:?}");
    };
    assert_eq!(before.bounds.x, 0.0);
    assert_eq!(after.bounds.x, 30.0);
}

#[test]
fn unchanged_elements_are_filtered_from_updates() {
    let mut doc = Document::offline(flowchart()).unwrap();
    let set = {
        let mut uow = UnitOfWork::new(&mut doc);
        uow.update_element(TrackableRef::node(id("fc_end")));
        uow.mutate_node(id("fc_start"), |n| n.text = "Begin".into()).unwrap();
        uow.commit().unwrap()
    };
    assert_eq!(set.len(), 2);
    let updated: Vec<TrackableRef> = set.only_updated().refs().collect();
    assert_eq!(updated, vec![TrackableRef::node(id("fc_start"))]);
}

// ─── Structural edits ────────────────────────────────────────────────────

#[test]
fn adding_a_node_updates_layer_order() {
    let mut doc = Document::offline(flowchart()).unwrap();
    UnitOfWork::execute(&mut doc, |uow| {
        let node = DiagramNode::new(id("fc_mid"), "diamond", id("fc_layer"), Bounds::new(0.0, 100.0, 40.0, 40.0));
        uow.add_element(TrackableRef::layer(id("fc_layer")), Entity::Node(node), Some(1))
    })
    .unwrap();

    let d = doc.diagram();
    assert_eq!(
        d.layer(id("fc_layer")).unwrap().elements,
        vec![id("fc_start"), id("fc_mid"), id("fc_end"), id("fc_link")]
    );
    assert_eq!(d.node(id("fc_mid")).unwrap().layer, id("fc_layer"));
    assert!(doc.stored(TrackableRef::node(id("fc_mid"))).unwrap().is_some());
}

#[test]
fn duplicate_ids_are_rejected() {
    let mut doc = Document::offline(flowchart()).unwrap();
    let err = UnitOfWork::execute(&mut doc, |uow| {
        let node = DiagramNode::new(id("fc_end"), "rect", id("fc_layer"), Bounds::default());
        uow.add_element(TrackableRef::layer(id("fc_layer")), Entity::Node(node), None)
    })
    .unwrap_err();
    assert!(matches!(err, Error::DuplicateId(_)));
}

#[test]
fn edges_must_reference_existing_nodes() {
    let mut doc = Document::offline(flowchart()).unwrap();
    let edge = DiagramEdge::new(
        id("fc_bad_link"),
        id("fc_layer"),
        Endpoint::Connected {
            node: id("fc_ghost"),
            anchor: "east".into(),
        },
        Endpoint::Free { x: 0.0, y: 0.0 },
    );
    let err = UnitOfWork::execute(&mut doc, |uow| {
        uow.add_element(TrackableRef::layer(id("fc_layer")), Entity::Edge(edge), None)
    })
    .unwrap_err();
    assert!(matches!(err, Error::DanglingReference { .. }));
    assert!(doc.diagram().edge(id("fc_bad_link")).is_none());
}

#[test]
fn removing_a_node_frees_connected_edge_ends() {
    let mut doc = Document::offline(flowchart()).unwrap();
    UnitOfWork::execute(&mut doc, |uow| {
        uow.remove_element(TrackableRef::layer(id("fc_layer")), TrackableRef::node(id("fc_start")))
    })
    .unwrap();

    let d = doc.diagram();
    assert!(d.node(id("fc_start")).is_none());
    let link = d.edge(id("fc_link")).unwrap();
    assert_eq!(link.start, Endpoint::Free { x: 50.0, y: 20.0 });
    assert_eq!(link.end.node(), Some(id("fc_end")));
    assert_eq!(doc.stored(TrackableRef::node(id("fc_start"))).unwrap(), None);
}

#[test]
fn removing_a_node_removes_nested_children() {
    let mut doc = Document::offline(flowchart()).unwrap();
    UnitOfWork::execute(&mut doc, |uow| {
        let label = DiagramNode::new(id("fc_label"), "text", id("fc_layer"), Bounds::new(5.0, 5.0, 50.0, 10.0));
        uow.add_element(TrackableRef::node(id("fc_start")), Entity::Node(label), None)
    })
    .unwrap();
    assert_eq!(doc.diagram().node(id("fc_label")).unwrap().parent, Some(id("fc_start")));

    UnitOfWork::execute(&mut doc, |uow| {
        uow.remove_element(TrackableRef::layer(id("fc_layer")), TrackableRef::node(id("fc_start")))
    })
    .unwrap();
    assert!(doc.diagram().node(id("fc_label")).is_none());
    assert_eq!(doc.stored(TrackableRef::node(id("fc_label"))).unwrap(), None);
}

#[test]
fn removing_a_stylesheet_clears_references() {
    let mut doc = Document::offline(flowchart()).unwrap();
    let set = {
        let mut uow = UnitOfWork::new(&mut doc);
        let diagram = TrackableRef::diagram(id("fc"));
        uow.remove_element(diagram, TrackableRef::stylesheet(id("fc_style")))
            .unwrap();
        uow.commit().unwrap()
    };
    let d = doc.diagram();
    assert!(d.stylesheet(id("fc_style")).is_none());
    assert!(d.root().stylesheets.is_empty());
    assert_eq!(d.node(id("fc_start")).unwrap().style, None);
    assert_eq!(d.node(id("fc_end")).unwrap().style, None);
    assert!(set.contains(TrackableRef::node(id("fc_start"))));
}

#[test]
fn first_layer_becomes_active() {
    let mut doc = Document::offline(Diagram::new(id("blank"), "Blank")).unwrap();
    UnitOfWork::execute(&mut doc, |uow| {
        uow.add_element(
            TrackableRef::diagram(id("blank")),
            Entity::Layer(Layer::new(id("blank_l1"), "One")),
            None,
        )?;
        uow.add_element(
            TrackableRef::diagram(id("blank")),
            Entity::Layer(Layer::new(id("blank_l2"), "Two")),
            Some(0),
        )
    })
    .unwrap();
    let root = doc.diagram().root();
    assert_eq!(root.layers, vec![id("blank_l2"), id("blank_l1")]);
    assert_eq!(root.active_layer, Some(id("blank_l1")));
}

#[test]
fn layers_cannot_hold_layers() {
    let mut doc = Document::offline(flowchart()).unwrap();
    let err = UnitOfWork::execute(&mut doc, |uow| {
        uow.add_element(
            TrackableRef::layer(id("fc_layer")),
            Entity::Layer(Layer::new(id("fc_inner"), "Inner")),
            None,
        )
    })
    .unwrap_err();
    assert!(matches!(err, Error::InvalidChild { .. }));
}

// ─── Events ──────────────────────────────────────────────────────────────

#[test]
fn commit_emits_one_event_per_element_in_order() {
    let mut doc = Document::offline(flowchart()).unwrap();
    let seen = recorder(&mut doc);
    UnitOfWork::execute(&mut doc, |uow| {
        uow.remove_element(TrackableRef::layer(id("fc_layer")), TrackableRef::node(id("fc_end")))
    })
    .unwrap();

    let events: Vec<(TrackableRef, ChangeType)> = seen.borrow().iter().map(|e| (e.element, e.change)).collect();
    assert_eq!(
        events,
        vec![
            (TrackableRef::layer(id("fc_layer")), ChangeType::Updated),
            (TrackableRef::node(id("fc_end")), ChangeType::Removed),
            (TrackableRef::edge(id("fc_link")), ChangeType::Updated),
        ]
    );
    assert!(seen.borrow().iter().all(|e| e.origin == ChangeOrigin::Local));
}

#[test]
fn events_can_be_disabled_by_config() {
    let mut doc = Document::offline(flowchart()).unwrap();
    doc.config_mut().emit_events = false;
    let seen = recorder(&mut doc);
    UnitOfWork::execute(&mut doc, |uow| uow.mutate_node(id("fc_end"), |n| n.text = "Stop".into())).unwrap();
    assert!(seen.borrow().is_empty());
}

// ─── Rollback ────────────────────────────────────────────────────────────

#[test]
fn error_mid_edit_restores_structure() {
    let mut doc = Document::offline(flowchart()).unwrap();
    let seen = recorder(&mut doc);
    let before_layer = doc.diagram().layer(id("fc_layer")).cloned();
    let before_link = doc.diagram().edge(id("fc_link")).cloned();

    let result = UnitOfWork::execute(&mut doc, |uow| {
        uow.remove_element(TrackableRef::layer(id("fc_layer")), TrackableRef::node(id("fc_start")))?;
        let node = DiagramNode::new(id("fc_extra"), "rect", id("fc_layer"), Bounds::default());
        uow.add_element(TrackableRef::layer(id("fc_layer")), Entity::Node(node), None)?;
        uow.mutate_node(id("fc_missing"), |n| n.text = "never".into())
    });

    assert!(matches!(result, Err(Error::UnknownElement(_))));
    let d = doc.diagram();
    assert!(d.node(id("fc_start")).is_some());
    assert!(d.node(id("fc_extra")).is_none());
    assert_eq!(d.layer(id("fc_layer")).cloned(), before_layer);
    assert_eq!(d.edge(id("fc_link")).cloned(), before_link);
    assert!(seen.borrow().is_empty());
    assert_eq!(doc.stored(TrackableRef::node(id("fc_extra"))).unwrap(), None);
}

#[test]
fn explicit_abort_restores_state() {
    let mut doc = Document::offline(flowchart()).unwrap();
    let mut uow = UnitOfWork::new(&mut doc);
    uow.mutate_diagram(|root| root.name = "Renamed".into());
    uow.mutate_node(id("fc_end"), |n| n.bounds.y = 999.0).unwrap();
    uow.abort();

    assert_eq!(doc.diagram().root().name, "Flowchart");
    assert_eq!(doc.diagram().node(id("fc_end")).unwrap().bounds.y, 200.0);
}
