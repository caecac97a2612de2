use recordkeeper::datatype::{DagOperator, RecTy, RecTyKind, TypedValue};
use recordkeeper::error::TableGenError;
use recordkeeper::session::Session;

const SOURCE: &str = r#"
class Operand;
def GPR : Operand;
def imm : Operand;

class Inst<bits<4> op> {
    bits<4> Opcode = op;
    bits<8> Encoding = { 0, 0, 1, ?, Opcode };
    bit Predicable = true;
    int Size = 0x10;
    int Neg = -3;
    string Name = "inst";
    string Quoted = "say \"hi\"\n";
    code Asm = [{ $dst = $src }];
    list<int> Costs = [1, 2, 3];
    list<string> Empty = [];
    list<Operand> Uses = [GPR, imm];
    dag Ins = (ins GPR:$src, imm:$offset, ?:$pad, $bare);
    dag Tagged = (Operand 1, "two");
    string Full = !strconcat(Name, "_", "x");
    int Missing = ?;
}

def ADDri : Inst<0b0101>;
"#;

fn setup() -> Session {
    Session::open(SOURCE, Vec::<String>::new()).expect("value source parses")
}

#[test]
fn bit_vectors_are_stored_least_significant_first() {
    let session = setup();
    let add = session.record_keeper().get_def("ADDri").unwrap();
    let opcode = add.value_as_bits("Opcode").unwrap();
    assert_eq!(opcode, &[Some(true), Some(false), Some(true), Some(false)]);
    let encoding = add.value_as_bits("Encoding").unwrap();
    assert_eq!(encoding.len(), 8);
    // { 0, 0, 1, ?, Opcode } written most significant first
    assert_eq!(
        encoding,
        &[Some(true), Some(false), Some(true), Some(false), None, Some(true), Some(false), Some(false)]
    );
    let field = add.get_field("Encoding").unwrap();
    assert_eq!(field.value().unwrap().to_string(), "{ 0, 0, 1, ?, 0, 1, 0, 1 }");
}

#[test]
fn scalar_values() {
    let session = setup();
    let add = session.record_keeper().get_def("ADDri").unwrap();
    assert!(add.value_as_bit("Predicable").unwrap());
    assert_eq!(add.value_as_int("Size").unwrap(), 16);
    assert_eq!(add.value_as_int("Neg").unwrap(), -3);
    assert_eq!(add.value_as_string("Name").unwrap(), "inst");
    assert_eq!(add.value_as_string("Quoted").unwrap(), "say \"hi\"\n");
    assert_eq!(add.value_as_string("Asm").unwrap(), " $dst = $src ");
    assert_eq!(add.field_type("Asm"), Some(RecTyKind::Code));
    assert_eq!(add.value_as_string("Full").unwrap(), "inst_x");
}

#[test]
fn lists_carry_their_element_type() {
    let session = setup();
    let add = session.record_keeper().get_def("ADDri").unwrap();
    let costs = add.value_as_list("Costs").unwrap();
    assert_eq!(costs.element(), &RecTy::Int);
    assert_eq!(costs.len(), 3);
    assert_eq!(costs.get(2), Some(&TypedValue::Int(3)));
    assert!(costs.get(3).is_none());
    assert!(add.value_as_list("Empty").unwrap().is_empty());
    let uses = add.get_field("Uses").unwrap();
    assert_eq!(uses.ty(), &RecTy::List(Box::new(RecTy::Record("Operand".into()))));
    let first = uses.value().unwrap().list_element(0).unwrap();
    assert_eq!(first.as_record_ref().unwrap().name(), "GPR");
    match uses.value().unwrap().list_element(5) {
        Err(TableGenError::IndexOutOfRange { index: 5, len: 2 }) => (),
        other => panic!("expected an out of range error, got {:?}", other),
    }
}

#[test]
fn dags_keep_operator_names_and_values() {
    let session = setup();
    let add = session.record_keeper().get_def("ADDri").unwrap();
    let ins = add.get_field("Ins").unwrap().value().unwrap();
    assert!(matches!(ins.dag_operator().unwrap(), DagOperator::Name(name) if name.as_str() == "ins"));
    assert_eq!(ins.dag_num_args().unwrap(), 4);
    assert_eq!(ins.dag_arg_name(0).unwrap(), Some("src"));
    assert_eq!(ins.dag_arg(0).unwrap().unwrap().as_record_ref().unwrap().name(), "GPR");
    assert_eq!(ins.dag_arg_name(2).unwrap(), Some("pad"));
    assert!(ins.dag_arg(2).unwrap().is_none(), "? arguments are unset");
    assert!(ins.dag_arg(3).unwrap().is_none());
    assert_eq!(ins.dag_arg_name(3).unwrap(), Some("bare"));
    assert!(ins.dag_arg(4).is_err());
    assert_eq!(ins.to_string(), "(ins GPR:$src, imm:$offset, ?:$pad, ?:$bare)");

    let tagged = add.value_as_dag("Tagged").unwrap();
    match tagged.operator() {
        DagOperator::Def(record) => assert_eq!(record.name(), "Operand"),
        DagOperator::Name(name) => assert_eq!(name.as_str(), "Operand"),
    }
    assert_eq!(tagged.args()[1].value, Some(TypedValue::String("two".into())));
    assert!(tagged.args()[0].name.is_none());
}

#[test]
fn exactly_one_accessor_matches_each_kind() {
    let session = setup();
    let add = session.record_keeper().get_def("ADDri").unwrap();
    for field in add.fields() {
        let Some(value) = field.value() else { continue };
        let successes = [
            value.as_bit().is_ok(),
            value.as_bits().is_ok(),
            value.as_int().is_ok(),
            value.as_str().is_ok(),
            value.as_list().is_ok(),
            value.as_dag().is_ok(),
            value.as_record_ref().is_ok(),
        ];
        assert_eq!(
            successes.iter().filter(|ok| **ok).count(),
            1,
            "field {} should match exactly one accessor",
            field.name()
        );
        assert_eq!(value.kind(), field.kind(), "value kind of {} follows its type", field.name());
    }
}

#[test]
fn wrong_accessors_report_mismatches() {
    let session = setup();
    let add = session.record_keeper().get_def("ADDri").unwrap();
    match add.value_as_int("Name") {
        Err(TableGenError::TypeMismatch { expected: RecTyKind::Int, found: RecTyKind::String }) => (),
        other => panic!("expected a type mismatch, got {:?}", other),
    }
    assert!(matches!(add.value_as_bit("Missing"), Err(TableGenError::Unset { .. })));
    assert!(matches!(add.value_as_bit("Nope"), Err(TableGenError::NotFound { .. })));
    assert_eq!(add.field_type("Nope"), None);
}

#[test]
fn records_print_like_record_dumps() {
    let session = setup();
    let keeper = session.record_keeper();
    let printed = keeper.get_def("GPR").unwrap().to_string();
    assert_eq!(printed, "def GPR {\t// Operand\n}\n");
    let add = keeper.get_def("ADDri").unwrap().to_string();
    assert!(add.starts_with("def ADDri {\t// Inst\n"));
    assert!(add.contains("  int Size = 16;\n"));
    assert!(add.contains("  int Missing = ?;\n"));
    let dump = keeper.to_string();
    assert!(dump.starts_with("------------- Classes -----------------\n"));
    assert!(dump.contains("------------- Defs -----------------\n"));
}

#[test]
fn untyped_def_lists_take_the_shared_class() {
    let session = Session::open(
        r#"
        class Reg;
        class Special;
        def A;
        def B;
        def R0 : Reg;
        def SP : Special, Reg;
        def C { dag plain = (ins [A, B]); dag regs = (outs [SP, R0]); dag op = (R0 SP); }
        "#,
        Vec::<String>::new(),
    )
    .expect("untyped def lists parse");
    let c = session.record_keeper().get_def("C").unwrap();
    let element = |field: &str| {
        let dag = c.get_field(field).unwrap().value().unwrap();
        dag.dag_arg(0).unwrap().unwrap().as_list().unwrap().element().clone()
    };
    assert_eq!(element("plain"), RecTy::AnyRecord);
    assert_eq!(element("plain").kind(), RecTyKind::Record);
    assert_eq!(element("regs"), RecTy::Record("Reg".into()));
    // an operator naming a def refers to it, anything else stays a name
    let op = c.value_as_dag("op").unwrap();
    assert!(matches!(op.operator(), DagOperator::Def(record) if record.name() == "R0"));
    let plain = c.value_as_dag("plain").unwrap();
    assert!(matches!(plain.operator(), DagOperator::Name(name) if name.as_str() == "ins"));
}
