//! Publishing the process-wide type registry. Lives in its own test binary
//! because the registry can only be installed once per process.

use ferry_common::FerryError;
use ferry_core::data::{Column, integer, types};
use ferry_core::{Dataset, Envelope, TypeRegistry};

#[test]
fn test_registry_installs_once() {
    let installed = TypeRegistry::builtin()
        .register("int64", integer())
        .install()
        .unwrap();
    assert!(installed.contains("int64"));
    assert!(installed.contains("string"));

    // later lookups see the published registry
    assert_eq!(types().get("int64").unwrap().name(), "integer");

    let err = TypeRegistry::builtin().install().unwrap_err();
    assert!(matches!(err, FerryError::RegistryInitialized));

    // envelopes decode against the published registry
    let data = Dataset::new(vec![Column::from_values(vec![true, false]).into_data()]).unwrap();
    let bytes = Envelope::Payload(data).to_bytes().unwrap();
    match Envelope::from_bytes(&bytes, types()).unwrap() {
        Envelope::Payload(back) => assert_eq!(back.strings(), vec![vec!["true"], vec!["false"]]),
        other => panic!("unexpected envelope: {:?}", other),
    }
}
