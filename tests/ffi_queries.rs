use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use recordkeeper::datatype::RecTyKind;
use recordkeeper::interface::*;

const SOURCE: &str = r#"
class Base { bit flag = 1; }
class Reg<int n> : Base { int num = n; bits<3> enc = n; }
def Derived : Base { int count = 42; }
def R5 : Reg<5> { string name = "r5"; list<int> uses = [7, 8]; dag d = (Derived 1:$a, ?:$b); }
def : Base;
"#;

fn c(text: &str) -> CString {
    CString::new(text).unwrap()
}

unsafe fn text<'a>(ptr: *const c_char) -> &'a str {
    assert!(!ptr.is_null());
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap()
}

fn parsed(source: &str) -> TableGenRef {
    let source = c(source);
    unsafe {
        let tg = tableGenInitialize(source.as_ptr(), 0, ptr::null());
        assert!(!tg.is_null());
        assert_eq!(tableGenParse(tg), TABLEGEN_TRUE);
        tg
    }
}

#[test]
fn round_trip_through_the_c_interface() {
    let tg = parsed(SOURCE);
    unsafe {
        let keeper = tableGenGetRecordKeeper(tg);
        assert!(!keeper.is_null());
        let derived = tableGenRecordKeeperGetDef(keeper, c("Derived").as_ptr());
        assert_eq!(text(tableGenRecordGetName(derived)), "Derived");
        assert_eq!(tableGenRecordIsSubclassOf(derived, c("Base").as_ptr()), TABLEGEN_TRUE);
        assert_eq!(tableGenRecordIsAnonymous(derived), TABLEGEN_FALSE);
        // records lead back to the keeper that owns them
        assert_eq!(tableGenRecordGetRecords(derived), keeper);
        let base = tableGenRecordKeeperGetClass(keeper, c("Base").as_ptr());
        assert_eq!(tableGenRecordGetRecords(base), keeper);
        assert!(tableGenRecordGetRecords(ptr::null()).is_null());

        let flag = tableGenRecordGetValue(derived, c("flag").as_ptr());
        assert_eq!(tableGenRecordValGetType(flag), RecTyKind::Bit);
        let mut bit = -1i8;
        assert_eq!(tableGenRecordValGetValAsBit(flag, &mut bit), TABLEGEN_TRUE);
        assert_eq!(bit, 1);

        let count = tableGenRecordGetValue(derived, c("count").as_ptr());
        let mut integer = 0i64;
        assert_eq!(tableGenRecordValGetValAsInt(count, &mut integer), TABLEGEN_TRUE);
        assert_eq!(integer, 42);
        assert_eq!(tableGenRecordGetFieldType(derived, c("count").as_ptr()), RecTyKind::Int);
        tableGenFree(tg);
    }
}

#[test]
fn typed_values_through_the_c_interface() {
    let tg = parsed(SOURCE);
    unsafe {
        let keeper = tableGenGetRecordKeeper(tg);
        let r5 = tableGenRecordKeeperGetDef(keeper, c("R5").as_ptr());

        let uses = tableGenRecordGetValue(r5, c("uses").as_ptr());
        assert_eq!(tableGenListRecordGetType(uses), RecTyKind::Int);
        let list = tableGenRecordValGetValue(uses);
        assert_eq!(tableGenInitRecType(list), RecTyKind::List);
        assert_eq!(tableGenListRecordNumElements(list), 2);
        let mut integer = 0i64;
        assert_eq!(tableGenIntInitGetValue(tableGenListRecordGet(list, 1), &mut integer), TABLEGEN_TRUE);
        assert_eq!(integer, 8);
        assert!(tableGenListRecordGet(list, 2).is_null());

        let dag = tableGenRecordValGetValue(tableGenRecordGetValue(r5, c("d").as_ptr()));
        assert_eq!(tableGenDagRecordNumArgs(dag), 2);
        assert_eq!(text(tableGenDagRecordOperatorName(dag)), "Derived");
        let operator = tableGenDagRecordOperator(dag);
        assert_eq!(operator, tableGenRecordKeeperGetDef(keeper, c("Derived").as_ptr()));
        assert_eq!(text(tableGenDagRecordArgName(dag, 0)), "a");
        assert!(tableGenDagRecordGet(dag, 1).is_null(), "unset arguments have no value");
        assert!(tableGenDagRecordArgName(dag, 2).is_null());

        let num = tableGenRecordGetValue(r5, c("num").as_ptr());
        assert_eq!(tableGenRecordValGetValAsInt(num, &mut integer), TABLEGEN_TRUE);
        assert_eq!(integer, 5);

        // wrong kinds answer with sentinels
        let mut bit = 0i8;
        assert_eq!(tableGenRecordValGetValAsBit(num, &mut bit), TABLEGEN_FALSE);
        assert!(tableGenRecordValGetValAsNewString(num).is_null());
        assert!(tableGenRecordValGetValAsRecord(num).is_null());
        assert!(tableGenRecordValGetValAsBits(num, ptr::null_mut()).is_null());
        assert_eq!(tableGenListRecordGetType(num), RecTyKind::Invalid);
        assert_eq!(tableGenDagRecordNumArgs(tableGenRecordValGetValue(num)), 0);
        tableGenFree(tg);
    }
}

#[test]
fn cursors_visit_each_item_once() {
    let tg = parsed(SOURCE);
    unsafe {
        let keeper = tableGenGetRecordKeeper(tg);
        let mut defs = Vec::new();
        let mut item = tableGenRecordKeeperGetFirstDef(keeper);
        while !item.is_null() {
            defs.push(text(tableGenRecordKeeperItemGetName(item)).to_string());
            assert!(!tableGenRecordKeeperItemGetRecord(item).is_null());
            item = tableGenRecordKeeperGetNextDef(item);
        }
        assert_eq!(defs, ["Derived", "R5", "anonymous_0"]);
        assert!(tableGenRecordKeeperGetNextDef(ptr::null()).is_null(), "exhausted stays exhausted");

        let mut classes = Vec::new();
        let mut item = tableGenRecordKeeperGetFirstClass(keeper);
        while !item.is_null() {
            classes.push(text(tableGenRecordKeeperItemGetName(item)).to_string());
            item = tableGenRecordKeeperGetNextClass(item);
        }
        assert_eq!(classes, ["Base", "Reg"]);

        let r5 = tableGenRecordKeeperGetDef(keeper, c("R5").as_ptr());
        let mut fields = Vec::new();
        let mut field = tableGenRecordGetFirstValue(r5);
        while !field.is_null() {
            fields.push(text(tableGenRecordValGetName(field)).to_string());
            field = tableGenRecordValNext(r5, field);
        }
        assert_eq!(fields, ["flag", "num", "enc", "name", "uses", "d"]);

        let anonymous = tableGenRecordMapGet(tableGenRecordKeeperGetDefs(keeper), c("anonymous_0").as_ptr());
        assert_eq!(tableGenRecordIsAnonymous(anonymous), TABLEGEN_TRUE);
        let first_class = tableGenRecordMapGetFirst(tableGenRecordKeeperGetClasses(keeper));
        assert_eq!(text(tableGenRecordGetName(first_class)), "Base");
        tableGenFree(tg);
    }
}

#[test]
fn unknown_names_and_null_handles_are_sentinels() {
    let tg = parsed(SOURCE);
    unsafe {
        let keeper = tableGenGetRecordKeeper(tg);
        assert!(tableGenRecordKeeperGetDef(keeper, c("Nope").as_ptr()).is_null());
        assert!(tableGenRecordKeeperGetClass(keeper, c("Derived").as_ptr()).is_null());
        assert!(tableGenRecordKeeperGetDef(keeper, ptr::null()).is_null());
        assert!(tableGenRecordKeeperGetDef(ptr::null(), c("Derived").as_ptr()).is_null());
        let derived = tableGenRecordKeeperGetDef(keeper, c("Derived").as_ptr());
        assert!(tableGenRecordGetValue(derived, c("nope").as_ptr()).is_null());
        assert_eq!(tableGenRecordGetFieldType(derived, c("nope").as_ptr()), RecTyKind::Invalid);
        assert_eq!(tableGenRecordIsSubclassOf(derived, c("Reg").as_ptr()), TABLEGEN_FALSE);
        assert!(tableGenRecordGetName(ptr::null()).is_null());
        assert_eq!(tableGenInitRecType(ptr::null()), RecTyKind::Invalid);
        assert!(tableGenRecordValGetValue(ptr::null()).is_null());
        assert!(tableGenRecordKeeperGetFirstDef(ptr::null()).is_null());
        tableGenFree(tg);
    }
}

#[test]
fn failed_parse_produces_no_keeper() {
    let source = c("def X : Missing;");
    unsafe {
        let tg = tableGenInitialize(source.as_ptr(), 0, ptr::null());
        assert_eq!(tableGenParse(tg), TABLEGEN_FALSE);
        assert!(tableGenGetRecordKeeper(tg).is_null());
        assert!(text(tableGenGetLastError(tg)).contains("Missing"));
        tableGenFree(tg);
        // freeing null is a no-op
        tableGenFree(ptr::null_mut());
    }
}

#[test]
fn parsing_happens_once_per_handle() {
    let tg = parsed("def A;");
    unsafe {
        let keeper = tableGenGetRecordKeeper(tg);
        assert_eq!(tableGenParse(tg), TABLEGEN_FALSE);
        assert!(text(tableGenGetLastError(tg)).contains("already"));
        // the first parse stays usable
        assert_eq!(tableGenGetRecordKeeper(tg), keeper);
        tableGenFree(tg);
    }
}

#[test]
fn include_paths_are_passed_through() {
    let dir = std::env::temp_dir().join(format!("recordkeeper-ffi-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("base.td"), "class FromFile;").unwrap();
    let source = c("include \"base.td\" def D : FromFile;");
    let include = c(dir.to_str().unwrap());
    let includes = [include.as_ptr()];
    unsafe {
        let tg = tableGenInitialize(source.as_ptr(), includes.len(), includes.as_ptr());
        assert_eq!(tableGenParse(tg), TABLEGEN_TRUE);
        let keeper = tableGenGetRecordKeeper(tg);
        assert!(!tableGenRecordKeeperGetClass(keeper, c("FromFile").as_ptr()).is_null());
        tableGenFree(tg);
    }
    let _ = std::fs::remove_dir_all(&dir);
}
