use std::sync::Arc;

use h5gate_core::{
    DiagnosticKind, GateError, LinkRef, LinkState, Session, SessionOptions, SCHEMA_ID_ATTR,
};
use h5gate_spec::{Registry, SpecSource};
use h5gate_store::{HierStore, MemStore, OpenMode, Value};
use serde_json::{json, Value as Json};

fn registry(schema: Json) -> Arc<Registry> {
    let doc = json!({"info": {"name": "core", "version": "1.0"}, "schema": schema});
    let source = SpecSource::new("core.json", doc.to_string());
    Arc::new(Registry::load(&[source], None).unwrap())
}

/// Shared type library; each test adds its own root definition.
fn with_root(root: Json) -> Arc<Registry> {
    registry(json!({
        "<TimeSeries>/": {
            "attributes": {"unit": {"data_type": "text"}},
            "data": {"data_type": "float", "dimensions": ["t"]},
            "num_samples": {
                "data_type": "int",
                "autogen": {"type": "length", "target": "data"}
            }
        },
        "<Device>/": {},
        "/": root
    }))
}

fn acquisition_root() -> Json {
    json!({
        "_properties": {"closed": true},
        "acquisition/": {
            "<TimeSeries>/*": {},
            "series_names?": {
                "data_type": "text",
                "dimensions": ["n"],
                "autogen": {"type": "names", "target": "<TimeSeries>/*", "qty": "*"}
            }
        },
        "general/?": {
            "<Device>/?": {},
            "alias/?": {"link": {"target_type": "<TimeSeries>/"}}
        },
        "scratch/?": {}
    })
}

fn writable() -> SessionOptions {
    SessionOptions::default().with_mode(OpenMode::Write)
}

fn read_only(mut store: MemStore) -> MemStore {
    store.set_mode(OpenMode::Read);
    store
}

#[test]
fn created_container_round_trips_without_errors() {
    let reg = with_root(acquisition_root());
    let mut session = Session::create(MemStore::new(), reg.clone(), writable()).unwrap();
    let root = session.root();
    let acq = session.create_group(root, "acquisition/", None).unwrap();
    let ts = session
        .create_group(acq, "<TimeSeries>/", Some("ts1"))
        .unwrap();
    session
        .create_dataset(ts, "data", None, Value::FloatArray(vec![0.5, 1.5, 2.5]))
        .unwrap();
    session.set_attribute(ts, "unit", Value::text("volt")).unwrap();

    let closed = session.close().unwrap();
    assert!(closed.report.errors.is_empty(), "{:?}", closed.report.errors);
    assert_eq!(
        closed.store.get_value("/acquisition/ts1/num_samples").unwrap(),
        Value::Int(3)
    );
    assert_eq!(
        closed.store.get_value("/acquisition/series_names").unwrap(),
        Value::texts(["ts1"])
    );
    assert_eq!(
        closed
            .store
            .get_attribute("/acquisition/ts1", SCHEMA_ID_ATTR)
            .unwrap(),
        Some(Value::text("core:<TimeSeries>/"))
    );

    let session = Session::open(read_only(closed.store), reg, SessionOptions::default()).unwrap();
    let ts = session.lookup("/acquisition/ts1").unwrap();
    assert_eq!(
        session.tree().node(ts).schema_id().map(ToString::to_string),
        Some("core:<TimeSeries>/".to_string())
    );
    let closed = session.close().unwrap();
    assert!(closed.report.errors.is_empty(), "{:?}", closed.report.errors);
}

#[test]
fn read_only_session_refuses_writes() {
    let reg = with_root(acquisition_root());
    let mut store = MemStore::new();
    store.create_group("/", "acquisition").unwrap();
    let mut session = Session::open(read_only(store), reg.clone(), SessionOptions::default()).unwrap();
    let root = session.root();
    let err = session.create_group(root, "general/", None).unwrap_err();
    assert!(matches!(err, GateError::ReadOnly { .. }), "{err}");

    let err = Session::create(read_only(MemStore::new()), reg, writable()).unwrap_err();
    assert!(matches!(err, GateError::ReadOnly { .. }), "{err}");
}

#[test]
fn undeclared_member_of_closed_group_fails_unless_tolerant() {
    let reg = with_root(acquisition_root());
    let mut store = MemStore::new();
    store.create_group("/", "acquisition").unwrap();
    store.create_group("/", "stray").unwrap();
    let store = read_only(store);

    let session = Session::open(store.clone(), reg.clone(), SessionOptions::default()).unwrap();
    let err = session.close().unwrap_err();
    let GateError::ValidationFailed { report } = err else {
        panic!("expected a validation failure, got {err}");
    };
    let violations: Vec<_> = report.errors_of(DiagnosticKind::SchemaViolation).collect();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].path, "/stray");

    let tolerant = SessionOptions {
        tolerant: true,
        ..SessionOptions::default()
    };
    let closed = Session::open(store, reg, tolerant).unwrap().close().unwrap();
    assert_eq!(closed.report.warnings_of(DiagnosticKind::SchemaViolation).count(), 1);
}

#[test]
fn undeclared_member_of_open_group_is_a_warning() {
    let reg = with_root(acquisition_root());
    let mut store = MemStore::new();
    store.create_group("/", "acquisition").unwrap();
    store.create_group("/", "scratch").unwrap();
    store.create_group("/scratch", "anything").unwrap();
    store.create_group("/scratch/anything", "deeper").unwrap();

    let session = Session::open(read_only(store), reg, SessionOptions::default()).unwrap();
    let node = session.lookup("/scratch/anything").unwrap();
    assert!(session.tree().node(node).unconstrained);
    let closed = session.close().unwrap();
    let unrecognized: Vec<_> = closed
        .report
        .warnings_of(DiagnosticKind::Unrecognized)
        .map(|d| d.path.as_str())
        .collect();
    assert_eq!(unrecognized, vec!["/scratch/anything"]);
}

#[test]
fn multiplicity_is_enforced_on_create() {
    let reg = with_root(acquisition_root());
    let mut session = Session::create(MemStore::new(), reg, writable()).unwrap();
    let root = session.root();
    let general = session.create_group(root, "general/", None).unwrap();
    session.create_group(general, "<Device>/", Some("d1")).unwrap();
    let err = session
        .create_group(general, "<Device>/", Some("d2"))
        .unwrap_err();
    assert!(
        matches!(err, GateError::MultiplicityExceeded { max: 1, .. }),
        "{err}"
    );
    assert!(!session.store().exists("/general/d2"));
}

#[test]
fn undeclared_member_is_rejected_on_create_in_closed_group() {
    let reg = with_root(acquisition_root());
    let mut session = Session::create(MemStore::new(), reg, writable()).unwrap();
    let root = session.root();
    let err = session.create_group(root, "stray/", None).unwrap_err();
    assert!(matches!(err, GateError::SchemaViolation { .. }), "{err}");
    assert!(!session.store().exists("/stray"));
}

#[test]
fn soft_link_resolves_once_target_is_created() {
    let reg = with_root(acquisition_root());
    let mut session = Session::create(MemStore::new(), reg, writable()).unwrap();
    let root = session.root();
    let general = session.create_group(root, "general/", None).unwrap();
    let alias = session
        .create_link(
            general,
            "alias/",
            None,
            LinkRef::Soft {
                path: "/acquisition/ts1".to_string(),
            },
        )
        .unwrap();
    assert!(matches!(
        session.tree().node(alias).link,
        LinkState::Pending { .. }
    ));

    let acq = session.create_group(root, "acquisition/", None).unwrap();
    let ts = session
        .create_group(acq, "<TimeSeries>/", Some("ts1"))
        .unwrap();
    assert_eq!(
        session.tree().node(alias).link,
        LinkState::Resolved { target: ts }
    );
    session
        .create_dataset(ts, "data", None, Value::FloatArray(vec![1.0]))
        .unwrap();
    let closed = session.close().unwrap();
    assert!(closed.report.errors.is_empty(), "{:?}", closed.report.errors);
}

#[test]
fn dangling_link_fails_at_close() {
    let reg = with_root(acquisition_root());
    let mut session = Session::create(MemStore::new(), reg, writable()).unwrap();
    let root = session.root();
    session.create_group(root, "acquisition/", None).unwrap();
    let general = session.create_group(root, "general/", None).unwrap();
    session
        .create_link(
            general,
            "alias/",
            None,
            LinkRef::Soft {
                path: "/acquisition/never".to_string(),
            },
        )
        .unwrap();

    let err = session.close().unwrap_err();
    let GateError::ValidationFailed { report } = err else {
        panic!("expected a validation failure, got {err}");
    };
    let dangling: Vec<_> = report.errors_of(DiagnosticKind::LinkIntegrity).collect();
    assert_eq!(dangling.len(), 1);
    assert_eq!(dangling[0].path, "/general/alias");
}

#[test]
fn hard_link_to_wrong_type_is_rejected() {
    let reg = with_root(acquisition_root());
    let mut session = Session::create(MemStore::new(), reg, writable()).unwrap();
    let root = session.root();
    let general = session.create_group(root, "general/", None).unwrap();
    session.create_group(general, "<Device>/", Some("d1")).unwrap();
    let err = session
        .create_link(
            general,
            "alias/",
            None,
            LinkRef::Hard {
                path: "/general/d1".to_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, GateError::SchemaViolation { .. }), "{err}");
    assert!(!session.store().exists("/general/alias"));
}

fn aliased_store() -> MemStore {
    let mut store = MemStore::new();
    store.create_group("/", "acquisition").unwrap();
    store.create_group("/", "scratch").unwrap();
    store.create_group("/scratch", "a").unwrap();
    store.create_hard_link("/scratch/b", "/scratch/a").unwrap();
    store.create_soft_link("/scratch/c", "/scratch/a").unwrap();
    store
}

fn sorted(mut paths: Vec<String>) -> Vec<String> {
    paths.sort();
    paths
}

#[test]
fn hard_and_soft_aliases_form_one_group() {
    let reg = with_root(acquisition_root());
    let session = Session::open(read_only(aliased_store()), reg, SessionOptions::default()).unwrap();
    let expected = vec!["/scratch/a", "/scratch/b", "/scratch/c"];
    for p in &expected {
        assert_eq!(sorted(session.common_links(p).unwrap()), expected);
    }
    let a = session.lookup("/scratch/a").unwrap();
    for p in ["/scratch/b", "/scratch/c"] {
        let id = session.lookup(p).unwrap();
        assert_eq!(session.tree().node(id).link, LinkState::Resolved { target: a });
    }
}

#[test]
fn links_directive_lists_every_alias() {
    let mut root = acquisition_root();
    root["aliases?"] = json!({
        "data_type": "text",
        "dimensions": ["n"],
        "autogen": {"type": "links", "target": "scratch/a"}
    });
    let reg = with_root(root);
    let mut store = aliased_store();
    store.set_mode(OpenMode::ReadWrite);
    let mut session = Session::open(store, reg, SessionOptions::default()).unwrap();
    session.run_autogen().unwrap();
    assert_eq!(
        session.store().get_value("/aliases").unwrap(),
        Value::texts(["/scratch/a", "/scratch/b", "/scratch/c"])
    );
}

#[test]
fn links_directive_with_several_targets_is_fatal() {
    let mut root = acquisition_root();
    root["aliases?"] = json!({
        "data_type": "text",
        "dimensions": ["n"],
        "autogen": {"type": "links", "target": "acquisition/<TimeSeries>/*"}
    });
    let reg = with_root(root);
    let mut session = Session::create(MemStore::new(), reg, writable()).unwrap();
    let root = session.root();
    let acq = session.create_group(root, "acquisition/", None).unwrap();
    for name in ["first", "second"] {
        let ts = session.create_group(acq, "<TimeSeries>/", Some(name)).unwrap();
        session
            .create_dataset(ts, "data", None, Value::FloatArray(vec![1.0]))
            .unwrap();
    }
    let err = session.run_autogen().unwrap_err();
    let GateError::Autogen { message, .. } = &err else {
        panic!("expected an autogen error, got {err}");
    };
    assert!(message.contains("/acquisition/first"), "{message}");
    assert!(message.contains("/acquisition/second"), "{message}");
}

#[test]
fn length_of_external_link_is_left_unset() {
    let reg = with_root(acquisition_root());
    let mut store = MemStore::new();
    store.create_group("/", "acquisition").unwrap();
    store.create_group("/acquisition", "ts1").unwrap();
    store
        .set_attribute("/acquisition/ts1", SCHEMA_ID_ATTR, Value::text("core:<TimeSeries>/"))
        .unwrap();
    store
        .create_external_link("/acquisition/ts1/data", "raw.json", "/samples")
        .unwrap();
    store.set_mode(OpenMode::ReadWrite);

    let mut session = Session::open(store, reg, SessionOptions::default()).unwrap();
    let data = session.lookup("/acquisition/ts1/data").unwrap();
    assert!(matches!(
        session.tree().node(data).link,
        LinkState::External { .. }
    ));
    session.run_autogen().unwrap();
    assert_eq!(
        session
            .report()
            .warnings_of(DiagnosticKind::AutogenTarget)
            .count(),
        1
    );
    assert!(session.report().errors.is_empty(), "{:?}", session.report().errors);
    assert!(!session.store().exists("/acquisition/ts1/num_samples"));
}

#[test]
fn missing_inside_created_group_lists_its_absent_members() {
    let reg = with_root(json!({
        "acquisition/": {
            "autogen": {"type": "create"},
            "<TimeSeries>/+": {},
            "missing?": {
                "data_type": "text",
                "dimensions": ["n"],
                "autogen": {"type": "missing"}
            }
        }
    }));
    let session = Session::create(MemStore::new(), reg, writable()).unwrap();
    let closed = session.close().unwrap();
    assert!(closed.store.exists("/acquisition"));
    assert_eq!(
        closed.store.get_value("/acquisition/missing").unwrap(),
        Value::texts(["<TimeSeries>"])
    );
    let missing: Vec<_> = closed
        .report
        .warnings_of(DiagnosticKind::RequiredMemberMissing)
        .map(|d| d.path.as_str())
        .collect();
    assert_eq!(missing, vec!["/acquisition"]);
}

fn created_group_root() -> Json {
    json!({
        "acquisition/": {"autogen": {"type": "create"}},
        "other/?": {}
    })
}

#[test]
fn create_runs_before_missing_in_the_parent_group() {
    let mut root = created_group_root();
    root["absent?"] = json!({
        "data_type": "text",
        "dimensions": ["n"],
        "autogen": {"type": "missing", "include_empty": true}
    });
    let reg = with_root(root);
    let closed = Session::create(MemStore::new(), reg, writable())
        .unwrap()
        .close()
        .unwrap();
    assert!(closed.store.exists("/acquisition"));
    assert_eq!(
        closed.store.get_value("/absent").unwrap(),
        Value::TextArray(Vec::new())
    );
    assert!(closed.report.errors.is_empty(), "{:?}", closed.report.errors);
    assert_eq!(
        closed
            .report
            .warnings_of(DiagnosticKind::RequiredMemberMissing)
            .count(),
        0
    );
}

#[test]
fn create_member_is_reported_missing_in_read_only_sessions() {
    let mut store = MemStore::new();
    store.create_group("/", "other").unwrap();

    let reg = with_root(created_group_root());
    let session = Session::open(read_only(store.clone()), reg, SessionOptions::default()).unwrap();
    let GateError::ValidationFailed { report } = session.close().unwrap_err() else {
        panic!("expected a validation failure");
    };
    let missing: Vec<_> = report
        .errors_of(DiagnosticKind::RequiredMemberMissing)
        .collect();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].path, "/");
    assert!(missing[0].message.contains("acquisition"), "{}", missing[0].message);

    // A `missing` directive in the parent lists it and demotes the error.
    let mut root = created_group_root();
    root["absent?"] = json!({
        "data_type": "text",
        "dimensions": ["n"],
        "autogen": {"type": "missing"}
    });
    store
        .create_dataset("/", "absent", Value::texts(["acquisition"]), &Default::default())
        .unwrap();
    let closed = Session::open(read_only(store), with_root(root), SessionOptions::default())
        .unwrap()
        .close()
        .unwrap();
    assert!(!closed.store.exists("/acquisition"));
    let listed = closed
        .directives
        .iter()
        .find(|d| d.path == "/absent")
        .and_then(|d| d.value.clone());
    assert_eq!(listed, Some(Value::texts(["acquisition"])));
    assert_eq!(
        closed
            .report
            .warnings_of(DiagnosticKind::RequiredMemberMissing)
            .count(),
        1
    );
}

/// Library for the list-valued directive kinds.
fn directive_registry(root: Json) -> Arc<Registry> {
    registry(json!({
        "<Device>/": {},
        "<Trial>": {"data_type": "int", "dimensions": ["n"]},
        "/": root
    }))
}

#[test]
fn link_path_renders_each_link_source() {
    let reg = directive_registry(json!({
        "src/?": {"<Device>/*": {}},
        "grp/?": {"<Device>/*": {}},
        "paths?": {
            "data_type": "text",
            "autogen": {"type": "link_path", "target": "grp/<Device>/*", "qty": "*"}
        }
    }));
    let mut session = Session::create(MemStore::new(), reg, writable()).unwrap();
    let root = session.root();
    let src = session.create_group(root, "src/", None).unwrap();
    let grp = session.create_group(root, "grp/", None).unwrap();
    for (name, target) in [("a", "l10"), ("b", "l2")] {
        session.create_group(src, "<Device>/", Some(name)).unwrap();
        session
            .create_link(
                grp,
                "<Device>/",
                Some(target),
                LinkRef::Soft {
                    path: format!("/src/{name}"),
                },
            )
            .unwrap();
    }
    let closed = session.close().unwrap();
    assert!(closed.report.errors.is_empty(), "{:?}", closed.report.errors);
    assert_eq!(
        closed.store.get_value("/paths").unwrap(),
        Value::text("/grp/l10 is /src/a\n/grp/l2 is /src/b")
    );
}

#[test]
fn links_directive_trims_the_shared_suffix() {
    let reg = directive_registry(json!({
        "a/?": {"item/?": {}},
        "b/?": {"item/?": {}},
        "owners?": {
            "data_type": "text",
            "dimensions": ["n"],
            "autogen": {"type": "links", "target": "a/item", "trim": true}
        }
    }));
    let mut store = MemStore::new();
    store.create_group("/", "a").unwrap();
    store.create_group("/", "b").unwrap();
    store.create_group("/a", "item").unwrap();
    store.create_hard_link("/b/item", "/a/item").unwrap();
    store.set_mode(OpenMode::ReadWrite);

    let mut session = Session::open(store, reg, SessionOptions::default()).unwrap();
    session.run_autogen().unwrap();
    assert_eq!(
        session.store().get_value("/owners").unwrap(),
        Value::texts(["/a", "/b"])
    );
}

fn trials_root() -> Json {
    json!({
        "runs/?": {"<Trial>*": {}},
        "trial_ids?": {
            "data_type": "int",
            "dimensions": ["n"],
            "autogen": {"type": "values", "target": "runs/<Trial>*", "qty": "*"}
        },
        "trial_names?": {
            "data_type": "text",
            "dimensions": ["n"],
            "autogen": {"type": "names", "target": "runs/<Trial>*", "qty": "*", "include_empty": true}
        },
        "bare_names?": {
            "data_type": "text",
            "dimensions": ["n"],
            "autogen": {"type": "names", "target": "runs/<Trial>*", "qty": "*"}
        }
    })
}

#[test]
fn values_directive_takes_the_sorted_union() {
    let mut session = Session::create(MemStore::new(), directive_registry(trials_root()), writable()).unwrap();
    let root = session.root();
    let runs = session.create_group(root, "runs/", None).unwrap();
    session
        .create_dataset(runs, "<Trial>", Some("t1"), Value::IntArray(vec![3, 1]))
        .unwrap();
    session
        .create_dataset(runs, "<Trial>", Some("t2"), Value::IntArray(vec![2, 3]))
        .unwrap();
    let closed = session.close().unwrap();
    assert!(closed.report.errors.is_empty(), "{:?}", closed.report.errors);
    assert_eq!(
        closed.store.get_value("/trial_ids").unwrap(),
        Value::IntArray(vec![1, 2, 3])
    );
    assert_eq!(
        closed.store.get_value("/trial_names").unwrap(),
        Value::texts(["t1", "t2"])
    );
}

#[test]
fn empty_results_are_written_only_with_include_empty() {
    let mut session = Session::create(MemStore::new(), directive_registry(trials_root()), writable()).unwrap();
    let root = session.root();
    session.create_group(root, "runs/", None).unwrap();
    let closed = session.close().unwrap();
    assert!(closed.report.errors.is_empty(), "{:?}", closed.report.errors);
    assert_eq!(
        closed.store.get_value("/trial_names").unwrap(),
        Value::TextArray(Vec::new())
    );
    assert!(!closed.store.exists("/bare_names"));
    assert!(!closed.store.exists("/trial_ids"));
}

#[test]
fn values_of_a_scalar_dataset_are_fatal() {
    let reg = directive_registry(json!({
        "count?": {"data_type": "int"},
        "counts?": {
            "data_type": "int",
            "dimensions": ["n"],
            "autogen": {"type": "values", "target": "count"}
        }
    }));
    let mut session = Session::create(MemStore::new(), reg, writable()).unwrap();
    let root = session.root();
    session.create_dataset(root, "count", None, Value::Int(4)).unwrap();
    let err = session.run_autogen().unwrap_err();
    let GateError::Autogen { message, .. } = &err else {
        panic!("expected an autogen error, got {err}");
    };
    assert!(message.contains("scalar"), "{message}");
}

#[test]
fn extern_directive_lists_external_children() {
    let reg = directive_registry(json!({
        "linked/?": {
            "<Device>/*": {},
            "externals?": {
                "data_type": "text",
                "dimensions": ["n"],
                "autogen": {"type": "extern"}
            }
        }
    }));
    let mut session = Session::create(MemStore::new(), reg, writable()).unwrap();
    let root = session.root();
    let linked = session.create_group(root, "linked/", None).unwrap();
    session.create_group(linked, "<Device>/", Some("local")).unwrap();
    session
        .create_link(
            linked,
            "<Device>/",
            Some("remote"),
            LinkRef::External {
                file: "other.json".to_string(),
                path: "/devices/d1".to_string(),
            },
        )
        .unwrap();
    let closed = session.close().unwrap();
    assert!(closed.report.errors.is_empty(), "{:?}", closed.report.errors);
    assert_eq!(
        closed.store.get_value("/linked/externals").unwrap(),
        Value::texts(["remote"])
    );
}

#[test]
fn required_member_never_created_is_an_error() {
    let reg = with_root(acquisition_root());
    let session = Session::create(MemStore::new(), reg, writable()).unwrap();
    let err = session.close().unwrap_err();
    let GateError::ValidationFailed { report } = err else {
        panic!("expected a validation failure, got {err}");
    };
    let missing: Vec<_> = report
        .errors_of(DiagnosticKind::RequiredMemberMissing)
        .map(|d| d.message.clone())
        .collect();
    assert_eq!(missing.len(), 1);
    assert!(missing[0].contains("acquisition"), "{missing:?}");
}

#[test]
fn stale_autogen_values_are_reported() {
    let reg = with_root(acquisition_root());
    let mut store = MemStore::new();
    store.create_group("/", "acquisition").unwrap();
    store.create_group("/acquisition", "ts1").unwrap();
    store
        .set_attribute("/acquisition/ts1", SCHEMA_ID_ATTR, Value::text("core:<TimeSeries>/"))
        .unwrap();
    store
        .create_dataset(
            "/acquisition/ts1",
            "data",
            Value::FloatArray(vec![1.0, 2.0]),
            &Default::default(),
        )
        .unwrap();
    store
        .create_dataset("/acquisition/ts1", "num_samples", Value::Int(5), &Default::default())
        .unwrap();
    store
        .create_dataset(
            "/acquisition",
            "series_names",
            Value::texts(["renamed"]),
            &Default::default(),
        )
        .unwrap();

    // Read-only: a stale `names` list fails, a stale `length` only warns.
    let session = Session::open(read_only(store.clone()), reg.clone(), SessionOptions::default()).unwrap();
    let GateError::ValidationFailed { report } = session.close().unwrap_err() else {
        panic!("expected a validation failure");
    };
    let errors: Vec<_> = report
        .errors_of(DiagnosticKind::AutogenMismatch)
        .map(|d| d.path.as_str())
        .collect();
    assert_eq!(errors, vec!["/acquisition/series_names"]);
    let warnings: Vec<_> = report
        .warnings_of(DiagnosticKind::AutogenMismatch)
        .map(|d| d.path.as_str())
        .collect();
    assert_eq!(warnings, vec!["/acquisition/ts1/num_samples"]);

    // Read-write: existing datasets are never overwritten.
    store.set_mode(OpenMode::ReadWrite);
    let mut session = Session::open(store, reg, SessionOptions::default()).unwrap();
    session.run_autogen().unwrap();
    let updates: Vec<_> = session
        .report()
        .errors_of(DiagnosticKind::AutogenUpdate)
        .map(|d| d.path.as_str())
        .collect();
    assert_eq!(
        updates,
        vec!["/acquisition/series_names", "/acquisition/ts1/num_samples"]
    );
    assert_eq!(
        session.store().get_value("/acquisition/ts1/num_samples").unwrap(),
        Value::Int(5)
    );
}

#[test]
fn unsorted_list_is_an_error_only_when_sorting_is_required() {
    let mut root = acquisition_root();
    root["acquisition/"]["loose_names?"] = json!({
        "data_type": "text",
        "dimensions": ["n"],
        "autogen": {"type": "names", "target": "<TimeSeries>/*", "qty": "*", "sort": false}
    });
    let reg = with_root(root);
    let mut store = MemStore::new();
    store.create_group("/", "acquisition").unwrap();
    for name in ["b", "a"] {
        let at = format!("/acquisition/{name}");
        store.create_group("/acquisition", name).unwrap();
        store
            .set_attribute(&at, SCHEMA_ID_ATTR, Value::text("core:<TimeSeries>/"))
            .unwrap();
        store
            .create_dataset(&at, "data", Value::FloatArray(vec![1.0]), &Default::default())
            .unwrap();
        store
            .create_dataset(&at, "num_samples", Value::Int(1), &Default::default())
            .unwrap();
    }
    store
        .create_dataset("/acquisition", "series_names", Value::texts(["b", "a"]), &Default::default())
        .unwrap();
    store
        .create_dataset("/acquisition", "loose_names", Value::texts(["a", "b"]), &Default::default())
        .unwrap();

    let session = Session::open(read_only(store), reg, SessionOptions::default()).unwrap();
    let GateError::ValidationFailed { report } = session.close().unwrap_err() else {
        panic!("expected a validation failure");
    };
    let errors: Vec<_> = report
        .errors_of(DiagnosticKind::AutogenUnsorted)
        .map(|d| d.path.as_str())
        .collect();
    assert_eq!(errors, vec!["/acquisition/series_names"]);
    let warnings: Vec<_> = report
        .warnings_of(DiagnosticKind::AutogenUnsorted)
        .map(|d| d.path.as_str())
        .collect();
    assert_eq!(warnings, vec!["/acquisition/loose_names"]);
}

#[test]
fn embedded_spec_reopens_the_container() {
    let reg = with_root(acquisition_root());
    let options = SessionOptions {
        embed_spec: true,
        ..writable()
    };
    let mut session = Session::create(MemStore::new(), reg, options).unwrap();
    let root = session.root();
    session.create_group(root, "acquisition/", None).unwrap();
    let closed = session.close().unwrap();
    assert!(closed.store.exists("/specifications/core"));

    let sources = SpecSource::from_store(&closed.store, "/specifications").unwrap();
    assert_eq!(sources.len(), 1);

    let session =
        Session::open_embedded(read_only(closed.store), None, SessionOptions::default()).unwrap();
    assert!(session.lookup("/specifications").is_none());
    assert_eq!(session.registry().default_namespace(), "core");
    session.close().unwrap();
}
