// Kept as the only test of its binary: the allocation ledger is process wide.

use std::ffi::{CStr, CString};
use std::ptr;

use recordkeeper::interface::*;

const SOURCE: &str = r#"
class Inst { bits<4> op = 0; string asm = ""; }
class Alu : Inst;
def ADD : Alu { let op = 0b0011; let asm = "add"; dag ops = (ins 1:$lhs, 2); }
def SUB : Alu { let op = { 1, ?, 0, 1 }; }
def NOP : Inst;
"#;

fn c(text: &str) -> CString {
    CString::new(text).unwrap()
}

#[test]
fn every_owned_result_is_released_exactly_once() {
    let before = owned_allocations();
    assert_eq!(before.total(), 0);
    let source = c(SOURCE);
    unsafe {
        let tg = tableGenInitialize(source.as_ptr(), 0, ptr::null());
        assert_eq!(tableGenParse(tg), TABLEGEN_TRUE);
        let keeper = tableGenGetRecordKeeper(tg);

        // record vectors
        let alus = tableGenRecordKeeperGetAllDerivedDefinitions(keeper, c("Alu").as_ptr());
        let leaf = tableGenRecordKeeperGetAllDerivedDefinitions(keeper, c("Missing").as_ptr());
        assert_eq!(owned_allocations().record_vectors, 2);
        let names: Vec<&str> = (0..)
            .map(|i| tableGenRecordVectorGet(alus, i))
            .take_while(|record| !record.is_null())
            .map(|record| CStr::from_ptr(tableGenRecordGetName(record)).to_str().unwrap())
            .collect();
        assert_eq!(names, ["ADD", "SUB"]);
        assert!(tableGenRecordVectorGet(leaf, 0).is_null(), "empty, not an error");
        tableGenRecordVectorFree(alus);
        tableGenRecordVectorFree(leaf);

        // key arrays hold borrowed names
        let mut len = 0usize;
        let keys = tableGenRecordMapGetKeys(tableGenRecordKeeperGetDefs(keeper), &mut len);
        assert_eq!(len, 3);
        let first_key = *keys;
        assert_eq!(CStr::from_ptr(first_key).to_str().unwrap(), "ADD");
        assert_eq!(owned_allocations().string_arrays, 1);
        tableGenStringArrayFree(keys);
        // the names outlive the array
        assert_eq!(CStr::from_ptr(first_key).to_str().unwrap(), "ADD");

        // duplicated strings
        let add = tableGenRecordKeeperGetDef(keeper, c("ADD").as_ptr());
        let asm = tableGenRecordValGetValAsNewString(tableGenRecordGetValue(add, c("asm").as_ptr()));
        assert_eq!(CStr::from_ptr(asm).to_str().unwrap(), "add");
        let printed = tableGenRecordAsNewString(add);
        assert!(CStr::from_ptr(printed).to_str().unwrap().starts_with("def ADD {"));
        assert_eq!(owned_allocations().strings, 2);
        tableGenStringFree(asm);
        tableGenStringFree(printed);

        // bit arrays, least significant bit first, unset as -1
        let sub = tableGenRecordKeeperGetDef(keeper, c("SUB").as_ptr());
        let mut len = 0usize;
        let bits = tableGenRecordValGetValAsBits(tableGenRecordGetValue(sub, c("op").as_ptr()), &mut len);
        assert_eq!(std::slice::from_raw_parts(bits, len), &[1, 0, TABLEGEN_UNSET_BIT, 1]);
        let value = tableGenRecordValGetValue(tableGenRecordGetValue(add, c("op").as_ptr()));
        let add_bits = tableGenBitsInitGetValue(value, &mut len);
        assert_eq!(std::slice::from_raw_parts(add_bits, len), &[1, 1, 0, 0]);
        assert_eq!(owned_allocations().bit_arrays, 2);
        tableGenBitArrayFree(bits);
        tableGenBitArrayFree(add_bits);

        // dag pairs borrow their key and value
        let ops = tableGenRecordValGetValue(tableGenRecordGetValue(add, c("ops").as_ptr()));
        let named = tableGenDagRecordGetPair(ops, 0);
        let unnamed = tableGenDagRecordGetPair(ops, 1);
        assert!(tableGenDagRecordGetPair(ops, 2).is_null());
        assert_eq!(CStr::from_ptr(tableGenDagPairGetKey(named)).to_str().unwrap(), "lhs");
        assert!(tableGenDagPairGetKey(unnamed).is_null());
        let mut integer = 0i64;
        assert_eq!(tableGenIntInitGetValue(tableGenDagPairGetValue(unnamed), &mut integer), TABLEGEN_TRUE);
        assert_eq!(integer, 2);
        assert_eq!(owned_allocations().dag_pairs, 2);
        tableGenDagPairFree(named);
        tableGenDagPairFree(unnamed);

        // releasing null is a no-op for every shape
        tableGenStringFree(ptr::null_mut());
        tableGenStringArrayFree(ptr::null_mut());
        tableGenBitArrayFree(ptr::null_mut());
        tableGenRecordVectorFree(ptr::null_mut());
        tableGenDagPairFree(ptr::null_mut());

        // borrowed handles are never released; the session takes them along
        tableGenFree(tg);
    }
    assert_eq!(owned_allocations(), OwnedAllocations::default(), "no leaks, no double release");
}
