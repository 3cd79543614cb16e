#![no_main]

use libfuzzer_sys::fuzz_target;
use phasecurve::formula::{Calculator, FormulaEvaluator};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(calculator) = Calculator::new("X").and_then(|c| c.with_variable("K", 2.0)) else {
        return;
    };
    if let Ok(expression) = calculator.compile(text) {
        for x in [0.0, 0.5, -1.0, 1e300] {
            // Results must be finite or an error, never a panic.
            if let Ok(value) = calculator.evaluate(&expression, x) {
                assert!(value.is_finite());
            }
        }
    }
});
