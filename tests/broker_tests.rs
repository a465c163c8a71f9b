// tests/broker_tests.rs - include all broker integration test modules

mod broker {
    mod common;
    mod test_admission;
    mod test_cancel;
    mod test_lifecycle;
}
