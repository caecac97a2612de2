use recordkeeper::session::Session;

const SOURCE: &str = r#"
class Node { int id = 0; }
class Leaf : Node;
def Alpha : Node { let id = 1; }
def Beta : Leaf { let id = 2; }
def Gamma : Node { let id = 3; }
"#;

fn setup() -> Session {
    Session::open(SOURCE, Vec::<String>::new()).expect("lookup source parses")
}

#[test]
fn every_kept_name_is_found_in_its_own_map() {
    let session = setup();
    let keeper = session.record_keeper();
    for name in keeper.classes().keys() {
        assert_eq!(keeper.get_class(name).unwrap().name(), name);
        assert!(keeper.get_def(name).is_none(), "{name} is only a class");
    }
    for name in keeper.defs().keys() {
        assert_eq!(keeper.get_def(name).unwrap().name(), name);
    }
    assert!(keeper.get_def("alpha").is_none(), "lookup is case-sensitive");
    assert!(keeper.get_def("").is_none());
}

#[test]
fn maps_preserve_definition_order() {
    let session = setup();
    let keeper = session.record_keeper();
    assert_eq!(keeper.classes().keys(), ["Node", "Leaf"]);
    assert_eq!(keeper.defs().keys(), ["Alpha", "Beta", "Gamma"]);
    assert_eq!(keeper.defs().len(), 3);
    assert_eq!(keeper.defs().first().unwrap().name(), "Alpha");
    let ids: Vec<i64> = keeper
        .defs()
        .iter()
        .map(|(_, record)| record.value_as_int("id").unwrap())
        .collect();
    assert_eq!(ids, [1, 2, 3]);
    assert!(keeper.classes().records().all(|record| record.is_class()));
}

#[test]
fn map_items_know_the_end() {
    let session = setup();
    let defs = session.record_keeper().defs();
    let flags: Vec<bool> = defs.items().iter().map(|item| item.is_last()).collect();
    assert_eq!(flags, [false, false, true]);
    assert_eq!(defs.item(1).unwrap().name(), "Beta");
    assert!(defs.item(3).is_none());
}

#[test]
fn field_cursor_visits_every_field_once() {
    let session = Session::open(
        "class A { int a = 1; string b = \"\"; } def D : A { bit c = 0; }",
        Vec::<String>::new(),
    )
    .unwrap();
    let d = session.record_keeper().get_def("D").unwrap();
    let mut names = Vec::new();
    let mut cursor = d.first_field();
    while let Some(field) = cursor {
        names.push(field.name().to_string());
        cursor = d.next_field(field);
    }
    assert_eq!(names, ["a", "b", "c"]);
    // restarting is just asking for the first field again
    assert_eq!(d.first_field().unwrap().name(), "a");

    // a field of another record is not a position in this one
    let other = session.record_keeper().get_class("A").unwrap();
    assert!(d.next_field(other.first_field().unwrap()).is_none());
}

#[test]
fn records_know_their_keeper() {
    let session = setup();
    let keeper = session.record_keeper();
    for record in keeper.classes().records().chain(keeper.defs().records()) {
        let owner = record.keeper().expect("kept records link to their keeper");
        assert!(std::ptr::eq(&*owner, keeper), "{} links elsewhere", record.name());
    }
}

#[test]
fn shared_between_threads() {
    let session = std::sync::Arc::new(setup());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let session = std::sync::Arc::clone(&session);
            std::thread::spawn(move || {
                session
                    .record_keeper()
                    .all_derived_definitions("Node")
                    .len()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 3);
    }
}
