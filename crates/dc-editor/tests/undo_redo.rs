//! Integration tests: undo/redo through the editor (dc-editor).
//!
//! Every edit runs as a unit of work whose snapshot set becomes one undo
//! step; these tests check that steps revert and re-apply whole structural
//! edits, including side effects on connected elements.

use dc_core::*;
use dc_editor::*;
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::rc::Rc;

fn id(s: &str) -> ElementId {
    ElementId::intern(s)
}

/// Two connected boxes on one layer, both styled.
fn make_editor() -> Editor {
    let mut d = Diagram::new(id("ur"), "Undo");
    let mut layer = Layer::new(id("ur_layer"), "Main");
    layer.elements = vec![id("ur_a"), id("ur_b"), id("ur_ab")];
    d.insert_layer(layer).unwrap();
    d.insert_stylesheet(Stylesheet::new(id("ur_style"), StylesheetKind::Node, "Box"))
        .unwrap();
    for (name, y) in [("ur_a", 0.0), ("ur_b", 100.0)] {
        let mut node = DiagramNode::new(id(name), "rect", id("ur_layer"), Bounds::new(0.0, y, 20.0, 20.0));
        node.style = Some(id("ur_style"));
        d.insert_node(node).unwrap();
    }
    d.insert_edge(DiagramEdge::new(
        id("ur_ab"),
        id("ur_layer"),
        Endpoint::Connected {
            node: id("ur_a"),
            anchor: "south".into(),
        },
        Endpoint::Connected {
            node: id("ur_b"),
            anchor: "north".into(),
        },
    ))
    .unwrap();
    let root = d.root_mut();
    root.layers = vec![id("ur_layer")];
    root.stylesheets = vec![id("ur_style")];
    root.active_layer = Some(id("ur_layer"));
    Editor::offline(d).unwrap()
}

fn node_x(ed: &Editor, name: &str) -> f64 {
    ed.diagram().node(id(name)).unwrap().bounds.x
}

fn stored_node(ed: &Editor, name: &str) -> Option<DiagramNode> {
    match ed.document().stored(TrackableRef::node(id(name))).unwrap() {
        Some(Snapshot::Node(n)) => Some(n),
        Some(other) => panic!("unexpected snapshot {other:?}"),
        None => None,
    }
}

// ─── Basic undo/redo ─────────────────────────────────────────────────────

#[test]
fn undo_restores_previous_state() {
    let mut ed = make_editor();
    ed.execute_with_undo("Move a", |uow| uow.mutate_node(id("ur_a"), |n| n.bounds.x = 40.0))
        .unwrap();
    assert_eq!(node_x(&ed, "ur_a"), 40.0);

    assert_eq!(ed.undo(), Some("Move a".to_string()));
    assert_eq!(node_x(&ed, "ur_a"), 0.0);
    // The store follows the undo.
    assert_eq!(stored_node(&ed, "ur_a").unwrap().bounds.x, 0.0);
}

#[test]
fn redo_reapplies() {
    let mut ed = make_editor();
    ed.execute_with_undo("Move a", |uow| uow.mutate_node(id("ur_a"), |n| n.bounds.x = 40.0))
        .unwrap();
    ed.undo();
    assert_eq!(ed.redo(), Some("Move a".to_string()));
    assert_eq!(node_x(&ed, "ur_a"), 40.0);
    assert_eq!(stored_node(&ed, "ur_a").unwrap().bounds.x, 40.0);
}

#[test]
fn multiple_steps_undo_in_reverse() {
    let mut ed = make_editor();
    for x in [10.0, 20.0, 30.0] {
        ed.execute_with_undo("Move a", |uow| uow.mutate_node(id("ur_a"), |n| n.bounds.x = x))
            .unwrap();
    }
    assert_eq!(ed.undo_manager().undo_len(), 3);
    ed.undo();
    assert_eq!(node_x(&ed, "ur_a"), 20.0);
    ed.undo();
    assert_eq!(node_x(&ed, "ur_a"), 10.0);
    ed.undo();
    assert_eq!(node_x(&ed, "ur_a"), 0.0);
    assert_eq!(ed.undo(), None);
}

#[test]
fn new_edit_clears_redo() {
    let mut ed = make_editor();
    ed.execute_with_undo("first", |uow| uow.mutate_node(id("ur_a"), |n| n.text = "1".into()))
        .unwrap();
    ed.undo();
    assert!(ed.can_redo());
    ed.execute_with_undo("second", |uow| uow.mutate_node(id("ur_b"), |n| n.text = "2".into()))
        .unwrap();
    assert!(!ed.can_redo());
    assert_eq!(ed.redo(), None);
}

// ─── What gets recorded ──────────────────────────────────────────────────

#[test]
fn edits_that_end_where_they_started_are_not_recorded() {
    let mut ed = make_editor();
    ed.execute_with_undo("Wiggle", |uow| {
        uow.mutate_node(id("ur_a"), |n| n.bounds.x = 5.0)?;
        uow.mutate_node(id("ur_a"), |n| n.bounds.x = 0.0)
    })
    .unwrap();
    assert!(!ed.can_undo());
}

#[test]
fn failed_edits_are_not_recorded() {
    let mut ed = make_editor();
    let result = ed.execute_with_undo("Broken", |uow| {
        uow.mutate_node(id("ur_a"), |n| n.bounds.x = 5.0)?;
        Err::<(), _>(Error::Mutation("rejected".into()))
    });
    assert!(result.is_err());
    assert!(!ed.can_undo());
    assert_eq!(node_x(&ed, "ur_a"), 0.0);
}

#[test]
fn only_changed_elements_are_kept_in_the_step() {
    let mut ed = make_editor();
    ed.execute_with_undo("Touch both", |uow| {
        uow.update_element(TrackableRef::node(id("ur_b")));
        uow.mutate_node(id("ur_a"), |n| n.text = "changed".into())
    })
    .unwrap();
    assert_eq!(ed.undo_manager().peek_undo(), Some("Touch both"));
    ed.undo();
    assert_eq!(ed.diagram().node(id("ur_a")).unwrap().text, "");
}

#[test]
fn undo_depth_follows_config() {
    let mut ed = make_editor();
    let mut doc_config = ed.document().config().clone();
    doc_config.undo_depth = 5;
    *ed.undo_manager_mut() = UndoManager::with_config(&doc_config);
    for i in 1..=8 {
        ed.execute_with_undo("step", |uow| uow.mutate_node(id("ur_a"), |n| n.bounds.x = f64::from(i)))
            .unwrap();
    }
    assert_eq!(ed.undo_manager().undo_len(), 5);
    while ed.undo().is_some() {}
    // Steps 1..=3 fell off the stack.
    assert_eq!(node_x(&ed, "ur_a"), 3.0);
}

// ─── Structural edits ────────────────────────────────────────────────────

#[test]
fn undo_add_node() {
    let mut ed = make_editor();
    ed.execute_with_undo("Add c", |uow| {
        let node = DiagramNode::new(id("ur_c"), "ellipse", id("ur_layer"), Bounds::new(50.0, 50.0, 10.0, 10.0));
        uow.add_element(TrackableRef::layer(id("ur_layer")), Entity::Node(node), None)
    })
    .unwrap();
    assert!(ed.diagram().node(id("ur_c")).is_some());

    ed.undo();
    assert!(ed.diagram().node(id("ur_c")).is_none());
    assert_eq!(
        ed.diagram().layer(id("ur_layer")).unwrap().elements,
        vec![id("ur_a"), id("ur_b"), id("ur_ab")]
    );
    assert!(stored_node(&ed, "ur_c").is_none());

    ed.redo();
    assert_eq!(ed.diagram().node(id("ur_c")).unwrap().node_type, "ellipse");
    assert_eq!(
        ed.diagram().layer(id("ur_layer")).unwrap().elements,
        vec![id("ur_a"), id("ur_b"), id("ur_ab"), id("ur_c")]
    );
}

#[test]
fn undo_remove_node_reconnects_edge() {
    let mut ed = make_editor();
    let original_edge = ed.diagram().edge(id("ur_ab")).cloned();
    ed.execute_with_undo("Delete a", |uow| {
        uow.remove_element(TrackableRef::layer(id("ur_layer")), TrackableRef::node(id("ur_a")))
    })
    .unwrap();
    assert!(ed.diagram().node(id("ur_a")).is_none());
    assert_eq!(ed.diagram().edge(id("ur_ab")).unwrap().start.node(), None);

    ed.undo();
    assert!(ed.diagram().node(id("ur_a")).is_some());
    assert_eq!(ed.diagram().edge(id("ur_ab")).cloned(), original_edge);
    assert_eq!(
        ed.diagram().layer(id("ur_layer")).unwrap().elements,
        vec![id("ur_a"), id("ur_b"), id("ur_ab")]
    );

    ed.redo();
    assert!(ed.diagram().node(id("ur_a")).is_none());
    assert_eq!(ed.diagram().edge(id("ur_ab")).unwrap().start.node(), None);
}

#[test]
fn undo_remove_stylesheet_restores_references() {
    let mut ed = make_editor();
    let diagram = TrackableRef::diagram(id("ur"));
    ed.execute_with_undo("Drop style", |uow| {
        uow.remove_element(diagram, TrackableRef::stylesheet(id("ur_style")))
    })
    .unwrap();
    assert_eq!(ed.diagram().node(id("ur_a")).unwrap().style, None);

    ed.undo();
    assert!(ed.diagram().stylesheet(id("ur_style")).is_some());
    assert_eq!(ed.diagram().root().stylesheets, vec![id("ur_style")]);
    assert_eq!(ed.diagram().node(id("ur_a")).unwrap().style, Some(id("ur_style")));
    assert_eq!(ed.diagram().node(id("ur_b")).unwrap().style, Some(id("ur_style")));
}

#[test]
fn undo_remove_layer_restores_contents() {
    let mut ed = make_editor();
    let diagram = TrackableRef::diagram(id("ur"));
    ed.execute_with_undo("Drop layer", |uow| {
        uow.remove_element(diagram, TrackableRef::layer(id("ur_layer")))
    })
    .unwrap();
    assert_eq!(ed.diagram().node_count(), 0);
    assert_eq!(ed.diagram().edge_count(), 0);
    assert_eq!(ed.diagram().root().active_layer, None);

    ed.undo();
    assert_eq!(ed.diagram().node_count(), 2);
    assert_eq!(ed.diagram().edge_count(), 1);
    assert_eq!(ed.diagram().root().active_layer, Some(id("ur_layer")));
    assert_eq!(ed.diagram().edge(id("ur_ab")).unwrap().start.node(), Some(id("ur_a")));
}

#[test]
fn undo_skips_elements_it_cannot_restore() {
    let mut ed = make_editor();
    ed.execute_with_undo("Move a", |uow| uow.mutate_node(id("ur_a"), |n| n.bounds.x = 40.0))
        .unwrap();

    // Outside the history: the node goes away and a stylesheet takes its id.
    let diagram = TrackableRef::diagram(id("ur"));
    UnitOfWork::execute(ed.document_mut(), |uow| {
        uow.remove_element(TrackableRef::layer(id("ur_layer")), TrackableRef::node(id("ur_a")))?;
        let clash = Stylesheet::new(id("ur_a"), StylesheetKind::Node, "Clash");
        uow.add_element(diagram, Entity::Stylesheet(clash), None)
    })
    .unwrap();

    // The node cannot be recreated, yet the step still moves to redo.
    assert_eq!(ed.undo(), Some("Move a".to_string()));
    assert!(ed.diagram().node(id("ur_a")).is_none());
    assert!(ed.diagram().stylesheet(id("ur_a")).is_some());
    assert!(!ed.can_undo());
    assert!(ed.can_redo());
}

// ─── Attached actions ────────────────────────────────────────────────────

#[test]
fn attached_actions_wrap_the_snapshot_step() {
    let mut ed = make_editor();
    let log: Rc<RefCell<Vec<String>>> = Rc::default();
    let (on_redo, on_undo) = (Rc::clone(&log), Rc::clone(&log));

    ed.execute_with_undo("Select and move", |uow| {
        uow.mutate_node(id("ur_b"), |n| n.bounds.x = 70.0)?;
        uow.add_undo_action(Box::new(UndoableFn::new(
            "selection",
            move |doc: &mut Document| {
                let x = doc.diagram().node(id("ur_b")).map_or(f64::NAN, |n| n.bounds.x);
                on_redo.borrow_mut().push(format!("select at {x}"));
            },
            move |doc: &mut Document| {
                let x = doc.diagram().node(id("ur_b")).map_or(f64::NAN, |n| n.bounds.x);
                on_undo.borrow_mut().push(format!("deselect at {x}"));
            },
        )));
        Ok(())
    })
    .unwrap();
    // Attached actions are recorded, not executed.
    assert!(log.borrow().is_empty());

    ed.undo();
    ed.redo();
    // Undo reverts the attached action before the snapshots; redo re-applies
    // the snapshots first.
    assert_eq!(*log.borrow(), vec!["deselect at 70", "select at 70"]);
    assert_eq!(node_x(&ed, "ur_b"), 70.0);
}

#[test]
fn attached_action_alone_is_recorded() {
    let mut ed = make_editor();
    let counter = Rc::new(RefCell::new(0));
    let (inc, dec) = (Rc::clone(&counter), Rc::clone(&counter));
    ed.execute_with_undo("Counter", |uow| {
        uow.add_undo_action(Box::new(UndoableFn::new(
            "counter",
            move |_: &mut Document| *inc.borrow_mut() += 1,
            move |_: &mut Document| *dec.borrow_mut() -= 1,
        )));
        Ok(())
    })
    .unwrap();
    assert!(ed.can_undo());
    ed.undo();
    assert_eq!(*counter.borrow(), -1);
}

// ─── Events ──────────────────────────────────────────────────────────────

#[test]
fn undo_emits_change_events() {
    let mut ed = make_editor();
    ed.execute_with_undo("Add c", |uow| {
        let node = DiagramNode::new(id("ur_c2"), "rect", id("ur_layer"), Bounds::default());
        uow.add_element(TrackableRef::layer(id("ur_layer")), Entity::Node(node), None)
    })
    .unwrap();

    let seen: Rc<RefCell<Vec<(TrackableRef, ChangeType)>>> = Rc::default();
    let sink = Rc::clone(&seen);
    ed.document_mut()
        .subscribe(move |e| sink.borrow_mut().push((e.element, e.change)));
    ed.undo();
    assert_eq!(
        *seen.borrow(),
        vec![
            (TrackableRef::node(id("ur_c2")), ChangeType::Removed),
            (TrackableRef::layer(id("ur_layer")), ChangeType::Updated),
        ]
    );
}
