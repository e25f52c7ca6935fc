#![no_main]
use helios::vehicle::{ChargeState, ChargeTarget};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Interpret the input as a vehicle charge_state payload
    let Ok(mut state) = serde_json::from_slice::<ChargeState>(data) else {
        return;
    };
    state.normalize();
    assert!(state.charger_actual_current >= 0);
    assert!(state.charger_actual_current <= state.charge_current_request_max);

    let _ = ChargeTarget::readiness_check(&state);
    let _ = state.summary();
});
