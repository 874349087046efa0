//! End-to-end behavior across validate / to_dto / from_dto.
use serde_json::{Value as Json, json};

use crate::*;

fn graph() -> ConversionOptions { ConversionOptions::graph() }

fn tree() -> ConversionOptions { ConversionOptions::tree() }

/// Ids of every full `Object` payload of the given type name, in emission order.
fn emitted_ids(dto: &Json, type_name: &str, out: &mut Vec<u64>) {
    match dto {
        Json::Object(map) => {
            if let (Some(r), true) = (map.get("ref"), map.contains_key("object")) {
                if r["typeName"] == type_name {
                    out.extend(r["id"].as_u64());
                }
            }
            for v in map.values() {
                emitted_ids(v, type_name, out);
            }
        }
        Json::Array(items) => items.iter().for_each(|v| emitted_ids(v, type_name, out)),
        _ => {}
    }
}

// ---- Identity ----

#[test]
fn graph_round_trip_keeps_shared_nodes_shared() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let leaf = reg.add_type(root, "Leaf", ObjectDef::new().property("v", reg.number())).unwrap();
    let pair = reg.add_type(root, "Pair", ObjectDef::new().property("l", leaf).property("r", leaf)).unwrap();

    let mut heap = Heap::new();
    let shared = heap.object([("v", Value::from(7.0))]);
    let p = heap.object([("l", shared.clone()), ("r", shared)]);

    let dto = reg.ty(pair).to_dto(&heap, &p, &graph()).unwrap();
    assert_eq!(dto["object"]["r"], json!({"ref": {"id": 2, "category": "Object", "typeName": "Leaf"}}));

    let mut out = Heap::new();
    let back = reg.ty(pair).from_dto(&mut out, &dto, &graph()).unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out.property(&back, "l"), out.property(&back, "r"));
    assert!(heap.structurally_equal(&p, &out, &back));
}

#[test]
fn tree_round_trip_duplicates_shared_nodes() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let leaf = reg.add_type(root, "Leaf", ObjectDef::new().property("v", reg.number())).unwrap();
    let list = reg.anonymous(TypeDef::array(leaf));

    let mut heap = Heap::new();
    let shared = heap.object([("v", Value::from(1.0))]);
    let xs = heap.array(vec![shared.clone(), shared]);

    let dto = reg.ty(list).to_dto(&heap, &xs, &tree()).unwrap();
    let mut out = Heap::new();
    let back = reg.ty(list).from_dto(&mut out, &dto, &tree()).unwrap();
    let items = out.array_items(&back).unwrap();
    assert_ne!(items[0], items[1]);
    assert_eq!(out.export_json(&back), json!([{"v": 1}, {"v": 1}]));
}

#[test]
fn self_reference_validates_encodes_and_decodes() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let me = reg.link(root, "Loop");
    let lp = reg.add_type(root, "Loop", ObjectDef::new().property("self", me)).unwrap();

    let mut heap = Heap::new();
    let v = heap.object(Vec::<(&str, Value)>::new());
    heap.set(v.as_ref_id().unwrap(), "self", v.clone());

    reg.ty(lp).validate(&heap, &v).unwrap();
    let dto = reg.ty(lp).to_dto(&heap, &v, &graph()).unwrap();
    assert_eq!(dto["ref"]["id"], 1);
    assert_eq!(dto["object"]["self"], json!({"ref": {"id": 1, "category": "Object", "typeName": "Loop"}}));

    let mut out = Heap::new();
    let back = reg.ty(lp).from_dto(&mut out, &dto, &graph()).unwrap();
    assert_eq!(out.property(&back, "self"), Some(&back));

    let failure = reg.ty(lp).to_dto(&heap, &v, &tree()).unwrap_err();
    assert!(failure.any(|k| matches!(k, ErrorKind::CycleInTreeEncoding { .. })));
}

#[test]
fn mutual_recursion_across_schemas() {
    let mut reg = TypeRegistry::new("app");
    let root = reg.root();
    let left = reg.add_schema(root, "left").unwrap();
    let right = reg.add_schema(root, "right").unwrap();
    let to_b = reg.link(left, "/right/B");
    let to_a = reg.link(right, "/left/A");
    let opt_b = reg.anonymous(TypeDef::optional(to_b));
    let a = reg.add_type(left, "A", ObjectDef::new().property("b", opt_b)).unwrap();
    reg.add_type(right, "B", ObjectDef::new().property("a", to_a)).unwrap();
    reg.validate_schema(root).unwrap();

    let mut heap = Heap::new();
    let av = heap.object(Vec::<(&str, Value)>::new());
    let bv = heap.object([("a", av.clone())]);
    heap.set(av.as_ref_id().unwrap(), "b", bv);

    reg.ty(a).validate(&heap, &av).unwrap();
    let dto = reg.ty(a).to_dto(&heap, &av, &graph()).unwrap();
    let mut out = Heap::new();
    let back = reg.ty(a).from_dto(&mut out, &dto, &graph()).unwrap();
    assert!(heap.structurally_equal(&av, &out, &back));
    let b_back = out.property(&back, "b").unwrap().clone();
    assert_eq!(out.property(&b_back, "a"), Some(&back));
}

// ---- The family scenario ----

#[test]
fn family_graph_round_trip_with_inverse() {
    let mut reg = TypeRegistry::new("family");
    let root = reg.root();
    let person_link = reg.link(root, "Person");
    let parent = reg.anonymous(TypeDef::optional(person_link));
    let children = reg.anonymous(TypeDef::array(person_link));
    let person = reg
        .add_type(
            root,
            "Person",
            ObjectDef::new()
                .property("name", reg.string())
                .property("parent", parent)
                .property("children", children)
                .inverse("parent", person_link, "children")
                .inverse("children", person_link, "parent"),
        )
        .unwrap();
    reg.validate_schema(root).unwrap();
    assert_eq!(reg.status(root), ValidateStatus::Valid);

    let mut heap = Heap::new();
    let grandpa = heap.object([("name", Value::from("Grandpa"))]);
    let david = heap.object([("name", Value::from("David")), ("parent", grandpa.clone())]);
    let mark = heap.object([("name", Value::from("Mark")), ("parent", david.clone())]);
    let none = heap.array(vec![]);
    heap.set(mark.as_ref_id().unwrap(), "children", none);
    let davids = heap.array(vec![mark.clone()]);
    heap.set(david.as_ref_id().unwrap(), "children", davids);
    let grandpas = heap.array(vec![david.clone()]);
    heap.set(grandpa.as_ref_id().unwrap(), "children", grandpas);

    reg.ty(person).validate(&heap, &grandpa).unwrap();
    let dto = reg.ty(person).to_dto(&heap, &grandpa, &graph()).unwrap();

    let mut ids = Vec::new();
    emitted_ids(&dto, "Person", &mut ids);
    assert_eq!(ids, [1, 3, 5]);
    // David's parent is a token for Grandpa, Mark's for David
    let david_dto = &dto["object"]["children"]["array"][0];
    assert_eq!(david_dto["object"]["parent"]["ref"]["id"], 1);
    assert_eq!(david_dto["object"]["children"]["array"][0]["object"]["parent"]["ref"]["id"], 3);

    let mut out = Heap::new();
    let g = reg.ty(person).from_dto(&mut out, &dto, &graph()).unwrap();
    assert_eq!(out.len(), 6);
    assert!(heap.structurally_equal(&grandpa, &out, &g));
    let d = out.array_items(out.property(&g, "children").unwrap()).unwrap()[0].clone();
    let m = out.array_items(out.property(&d, "children").unwrap()).unwrap()[0].clone();
    assert_eq!(out.property(&d, "parent"), Some(&g));
    assert_eq!(out.property(&m, "parent"), Some(&d));
    assert_eq!(out.property(&m, "name"), Some(&Value::from("Mark")));
}

// ---- Unions ----

#[test]
fn union_round_trip_uses_recorded_member() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let short = reg.add_type(root, "Short", ObjectDef::new().property("name", reg.string())).unwrap();
    let long = reg
        .add_type(root, "Long", ObjectDef::new().property("name", reg.string()).property("bio", reg.string()))
        .unwrap();
    let long_first = reg.add_type(root, "Bio", TypeDef::union([long, short])).unwrap();

    let mut heap = Heap::new();
    let v = heap.object([("name", Value::from("n")), ("bio", Value::from("b"))]);
    let dto = reg.ty(long_first).to_dto(&heap, &v, &graph()).unwrap();
    assert_eq!(dto["typeInUnion"], "Long");

    let mut out = Heap::new();
    let back = reg.ty(long_first).from_dto(&mut out, &dto, &graph()).unwrap();
    assert!(heap.structurally_equal(&v, &out, &back));
}

#[test]
fn scalar_union_picks_first_validating_member() {
    let mut reg = TypeRegistry::default();
    let small = reg.anonymous(TypeDef::number().max(10.0));
    let any = reg.number();
    let u = reg.anonymous(TypeDef::union([small, any]));
    let heap = Heap::new();
    let dto = reg.ty(u).to_dto(&heap, &Value::from(50.0), &tree()).unwrap();
    assert_eq!(dto, json!({"typeInUnion": "number#1", "union": 50}));
}

fn shapes() -> (TypeRegistry, TypeId) {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let circle_tag = reg.anonymous(TypeDef::literal("circle"));
    let square_tag = reg.anonymous(TypeDef::literal("square"));
    let circle = reg
        .add_type(root, "Circle", ObjectDef::new().property("kind", circle_tag).property("r", reg.number()))
        .unwrap();
    let square = reg
        .add_type(root, "Square", ObjectDef::new().property("kind", square_tag).property("side", reg.number()))
        .unwrap();
    let shape = reg.add_type(root, "Shape", TypeDef::tagged_union("kind", [circle, square])).unwrap();
    reg.validate_schema(root).unwrap();
    (reg, shape)
}

#[test]
fn tagged_union_round_trip() {
    let (reg, shape) = shapes();
    let mut heap = Heap::new();
    let sq = heap.object([("kind", Value::from("square")), ("side", Value::from(2.0))]);
    let dto = reg.ty(shape).to_dto(&heap, &sq, &graph()).unwrap();
    assert_eq!(dto["ref"]["category"], "TaggedUnion");
    assert_eq!(dto["taggedUnion"]["ref"]["typeName"], "Square");

    let mut out = Heap::new();
    let back = reg.ty(shape).from_dto(&mut out, &dto, &graph()).unwrap();
    assert!(heap.structurally_equal(&sq, &out, &back));
}

#[test]
fn tagged_union_bad_discriminator_is_one_error() {
    let (reg, shape) = shapes();
    let cases = [
        json!({"taggedUnion": {"object": {"kind": "triangle", "r": 1}}}),
        json!({"taggedUnion": {"object": {"r": 1}}}),
        json!({"taggedUnion": {"object": {"kind": [1, 2]}}}),
    ];
    for dto in cases {
        let mut heap = Heap::new();
        let failure = reg.ty(shape).from_dto(&mut heap, &dto, &tree()).unwrap_err();
        assert_eq!(failure.len(), 1, "{dto}: {failure}");
        assert!(heap.is_empty());
    }
}

#[test]
fn obj_reference_before_its_owner_round_trips_to_one_node() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let note = reg.add_type(root, "Note", ObjectDef::new().property("text", reg.string())).unwrap();
    let pin = reg.anonymous(TypeDef::obj_reference(note));
    let notes = reg.anonymous(TypeDef::array(note));
    let board = reg
        .add_type(root, "Board", ObjectDef::new().property("pinned", pin).property("notes", notes))
        .unwrap();

    let mut heap = Heap::new();
    let first = heap.object([("text", Value::from("hello"))]);
    let second = heap.object([("text", Value::from("bye"))]);
    let list = heap.array(vec![first.clone(), second]);
    let b = heap.object([("pinned", first), ("notes", list)]);

    let dto = reg.ty(board).to_dto(&heap, &b, &graph()).unwrap();
    let pinned = &dto["object"]["pinned"];
    assert_eq!(pinned.as_object().map(|o| o.len()), Some(1));
    assert_eq!(pinned["ref"]["id"], dto["object"]["notes"]["array"][0]["ref"]["id"]);

    let mut out = Heap::new();
    let back = reg.ty(board).from_dto(&mut out, &dto, &graph()).unwrap();
    let pinned = out.property(&back, "pinned").unwrap().clone();
    let owned = out.array_items(out.property(&back, "notes").unwrap()).unwrap()[0].clone();
    assert_eq!(pinned, owned);
    assert_eq!(out.property(&pinned, "text"), Some(&Value::from("hello")));
    assert!(heap.structurally_equal(&b, &out, &back));
}

// ---- Other kinds ----

#[test]
fn intersection_decodes_into_one_node() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let named = reg.add_type(root, "Named", ObjectDef::new().property("name", reg.string())).unwrap();
    let aged = reg.add_type(root, "Aged", ObjectDef::new().property("age", reg.number())).unwrap();
    let both = reg.add_type(root, "Both", TypeDef::intersection([named, aged])).unwrap();

    let mut heap = Heap::new();
    let v = heap.object([("name", Value::from("x")), ("age", Value::from(3.0))]);
    let dto = reg.ty(both).to_dto(&heap, &v, &graph()).unwrap();
    assert_eq!(dto["intersection"]["Named"]["object"], json!({"name": "x"}));
    assert_eq!(dto["intersection"]["Aged"]["object"], json!({"age": 3}));

    let mut out = Heap::new();
    let back = reg.ty(both).from_dto(&mut out, &dto, &graph()).unwrap();
    assert_eq!(out.len(), 1);
    assert!(heap.structurally_equal(&v, &out, &back));
}

#[test]
fn intersection_extends_an_object_already_decoded_under_a_member_type() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let named = reg.add_type(root, "Named", ObjectDef::new().property("name", reg.string())).unwrap();
    let aged = reg.add_type(root, "Aged", ObjectDef::new().property("age", reg.number())).unwrap();
    let both = reg.add_type(root, "Both", TypeDef::intersection([named, aged])).unwrap();
    let holder = reg
        .add_type(root, "Holder", ObjectDef::new().property("a", named).property("b", both))
        .unwrap();

    let mut heap = Heap::new();
    let x = heap.object([("name", Value::from("x")), ("age", Value::from(3.0))]);
    let h = heap.object([("a", x.clone()), ("b", x)]);
    let dto = reg.ty(holder).to_dto(&heap, &h, &graph()).unwrap();
    let b = &dto["object"]["b"]["intersection"];
    assert_eq!(b["Named"]["ref"]["id"], dto["object"]["a"]["ref"]["id"]);
    assert!(b["Named"].get("object").is_none());

    let mut out = Heap::new();
    let back = reg.ty(holder).from_dto(&mut out, &dto, &graph()).unwrap();
    let a = out.property(&back, "a").unwrap().clone();
    assert_eq!(out.property(&back, "b"), Some(&a));
    assert_eq!(out.property(&a, "name"), Some(&Value::from("x")));
    assert_eq!(out.property(&a, "age"), Some(&Value::Number(3.0)));
    assert_eq!(out.len(), 2);
    assert!(heap.structurally_equal(&h, &out, &back));
}

#[test]
fn entity_reference_carries_only_the_identifier() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let user = reg
        .add_type(
            root,
            "User",
            ObjectDef::new().property("id", reg.string()).property("email", reg.string()).identifier(["id"]),
        )
        .unwrap();
    let user_ref = reg.anonymous(TypeDef::entity_reference(user));
    let post = reg
        .add_type(root, "Post", ObjectDef::new().property("author", user_ref).property("editor", user_ref))
        .unwrap();
    reg.validate_schema(root).unwrap();

    let mut heap = Heap::new();
    let u = heap.object([("id", Value::from("u1")), ("email", Value::from("a@b.c"))]);
    let p = heap.object([("author", u.clone()), ("editor", u)]);
    let dto = reg.ty(post).to_dto(&heap, &p, &graph()).unwrap();
    assert_eq!(dto["object"]["author"]["reference"], json!({"id": "u1"}));
    assert_eq!(dto["object"]["author"]["ref"]["category"], "EntityReference");

    let mut out = Heap::new();
    let back = reg.ty(post).from_dto(&mut out, &dto, &graph()).unwrap();
    let author = out.property(&back, "author").unwrap().clone();
    assert_eq!(out.export_json(&author), json!({"id": "u1"}));
    // deduplicated per ref id
    assert_eq!(out.property(&back, "editor"), Some(&author));
}

#[test]
fn map_with_object_keys_round_trips() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let key = reg.add_type(root, "Key", ObjectDef::new().property("k", reg.string())).unwrap();
    let m = reg.add_type(root, "Index", TypeDef::map(key, reg.number())).unwrap();

    let mut heap = Heap::new();
    let k1 = heap.object([("k", Value::from("a"))]);
    let k2 = heap.object([("k", Value::from("b"))]);
    let v = heap.map(vec![(k1.clone(), Value::from(1.0)), (k2, Value::from(2.0)), (k1, Value::from(3.0))]);

    let dto = reg.ty(m).to_dto(&heap, &v, &graph()).unwrap();
    assert_eq!(dto["map"][2][0], json!({"ref": {"id": 2, "category": "Object", "typeName": "Key"}}));
    let mut out = Heap::new();
    let back = reg.ty(m).from_dto(&mut out, &dto, &graph()).unwrap();
    assert!(heap.structurally_equal(&v, &out, &back));
}

#[test]
fn subtype_encodes_flattened_properties() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let animal = reg.add_type(root, "Animal", ObjectDef::new().property("name", reg.string())).unwrap();
    let dog = reg
        .add_type(root, "Dog", ObjectDef::new().extends(animal).property("breed", reg.string()))
        .unwrap();
    let mut heap = Heap::new();
    let rex = heap.object([("breed", Value::from("lab")), ("name", Value::from("Rex"))]);
    let dto = reg.ty(dog).to_dto(&heap, &rex, &tree().with_type_info(None)).unwrap();
    assert_eq!(dto, json!({"object": {"__type": "Dog", "name": "Rex", "breed": "lab"}}));

    let mut missing = Heap::new();
    let nameless = missing.object([("breed", Value::from("lab"))]);
    let failure = reg.ty(dog).validate(&missing, &nameless).unwrap_err();
    assert_eq!(failure.violations[0].kind, ErrorKind::MissingProperty { property: "name".into() });
}

#[test]
fn functional_properties_are_skipped() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let f = reg.anonymous(TypeDef::functional([reg.number()], reg.number()));
    let calc = reg
        .add_type(root, "Calc", ObjectDef::new().property("label", reg.string()).property("apply", f))
        .unwrap();
    let mut heap = Heap::new();
    let double = Func::new("double", 1, |args: &[Value]| Value::from(args[0].as_f64().unwrap_or(0.0) * 2.0));
    let c = heap.object([("label", Value::from("x2")), ("apply", Value::Function(double))]);
    reg.ty(calc).validate(&heap, &c).unwrap();
    let dto = reg.ty(calc).to_dto(&heap, &c, &tree()).unwrap();
    assert_eq!(dto, json!({"object": {"label": "x2"}}));

    let standalone = reg.ty(f).to_dto(&heap, &Value::Undefined, &tree()).unwrap_err();
    assert!(standalone.any(|k| matches!(k, ErrorKind::NotSerializable { .. })));
}

// ---- Errors ----

#[test]
fn sibling_failures_are_all_reported_with_paths() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let item = reg
        .add_type(root, "Item", ObjectDef::new().property("name", reg.string()).property("qty", reg.number()))
        .unwrap();
    let items = reg.anonymous(TypeDef::array(item));
    let order = reg.add_type(root, "Order", ObjectDef::new().property("items", items)).unwrap();

    let src = json!({"items": [{"name": "a", "qty": 1}, {"qty": "two"}, {"name": 3, "qty": 1}]});
    let mut heap = Heap::new();
    let v = heap.import_json(&src);
    let failure = reg.ty(order).to_dto(&heap, &v, &graph().validating()).unwrap_err();
    let paths: Vec<String> = failure.iter().map(|v| v.path.to_string()).collect();
    assert_eq!(paths, ["$.items[1].name", "$.items[1].qty", "$.items[2].name"]);
}

#[test]
fn unresolved_link_fails_only_its_own_branch() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let missing = reg.link(root, "Nowhere");
    let order = reg
        .add_type(root, "Order", ObjectDef::new().property("owner", missing).property("qty", reg.number()))
        .unwrap();

    let mut heap = Heap::new();
    let v = heap.import_json(&json!({"owner": {"id": 1}, "qty": "two"}));
    let kinds = |f: &Failure| -> Vec<(String, bool)> {
        f.iter()
            .map(|v| (v.path.to_string(), matches!(v.kind, ErrorKind::UnresolvedLink { .. })))
            .collect()
    };
    let expected = vec![("$.owner".to_string(), true), ("$.qty".to_string(), false)];

    let failure = reg.ty(order).validate(&heap, &v).unwrap_err();
    assert_eq!(kinds(&failure), expected);
    let failure = reg.ty(order).to_dto(&heap, &v, &graph()).unwrap_err();
    assert_eq!(kinds(&failure), expected);
}

#[test]
fn decode_with_validation_rejects_constraint_failures() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let age = reg.add_type(root, "Age", TypeDef::number().integer().min(0.0)).unwrap();
    let mut heap = Heap::new();
    assert!(reg.ty(age).from_dto(&mut heap, &json!(-1.5), &tree()).is_ok());
    let failure = reg.ty(age).from_dto(&mut heap, &json!(-1.5), &tree().validating()).unwrap_err();
    assert_eq!(failure.len(), 2);
}

// ---- Schemas ----

#[test]
fn removing_a_type_invalidates_every_ancestor() {
    let mut reg = TypeRegistry::default();
    let root = reg.root();
    let outer = reg.add_schema(root, "outer").unwrap();
    let inner = reg.add_schema(outer, "inner").unwrap();
    let sibling = reg.add_schema(root, "sibling").unwrap();
    reg.add_type(inner, "Leaf", TypeDef::string()).unwrap();
    let to_leaf = reg.link(sibling, "/outer/inner/Leaf");
    reg.add_type(sibling, "Uses", ObjectDef::new().property("leaf", to_leaf)).unwrap();

    reg.validate_schema(root).unwrap();
    for s in [root, outer, inner, sibling] {
        assert_eq!(reg.status(s), ValidateStatus::Valid);
    }

    reg.remove_type(inner, "Leaf").unwrap();
    assert_eq!(reg.status(inner), ValidateStatus::Invalid);
    assert_eq!(reg.status(outer), ValidateStatus::Invalid);
    assert_eq!(reg.status(root), ValidateStatus::Invalid);
    assert_eq!(reg.status(sibling), ValidateStatus::Valid);

    // re-running root validation does not re-check the still-valid sibling
    reg.validate_schema(root).unwrap();
    assert_eq!(reg.status(root), ValidateStatus::Valid);

    let failure = reg.ty(to_leaf).validate_links().unwrap_err();
    assert!(failure.any(|k| matches!(k, ErrorKind::UnresolvedLink { .. })));
}

#[test]
fn registry_is_shared_across_threads() {
    let (reg, shape) = shapes();
    let dtos: Vec<Json> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let reg = &reg;
                s.spawn(move || {
                    let mut heap = Heap::new();
                    let c = heap.object([("kind", Value::from("circle")), ("r", Value::from(i as f64))]);
                    reg.ty(shape).to_dto(&heap, &c, &ConversionOptions::graph()).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for (i, dto) in dtos.iter().enumerate() {
        // every call starts its own id counter
        assert_eq!(dto["ref"]["id"], 1);
        assert_eq!(dto["taggedUnion"]["object"]["r"], i);
    }
}
