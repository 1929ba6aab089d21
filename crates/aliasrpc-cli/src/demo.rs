//! Handlers served by `aliasrpc serve`.

use std::time::Duration;

use aliasrpc_server::{HandlerError, Params, Service};
use serde_json::{json, Value};

fn operands(params: &Params) -> Result<(f64, f64), HandlerError> {
    params.parse()
}

/// Arithmetic on two numbers. `slow_add` answers after a short delay.
pub fn math() -> Service {
    Service::named("math")
        .immediate("add", |params| {
            let (a, b) = operands(&params)?;
            Ok(number(a + b))
        })
        .immediate("sub", |params| {
            let (a, b) = operands(&params)?;
            Ok(number(a - b))
        })
        .immediate("mul", |params| {
            let (a, b) = operands(&params)?;
            Ok(number(a * b))
        })
        .immediate("div", |params| {
            let (a, b) = operands(&params)?;
            if b == 0.0 {
                return Err(HandlerError::new("division by zero"));
            }
            Ok(number(a / b))
        })
        .deferred("slow_add", |params| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let (a, b) = operands(&params)?;
            Ok::<_, HandlerError>(number(a + b))
        })
}

/// Returns its arguments unchanged.
pub fn echo() -> Service {
    Service::named("echo").immediate("echo", |params| Ok(Value::Array(params.into_inner())))
}

/// Integral results stay integers on the wire.
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}
