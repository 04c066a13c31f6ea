//! `Arith`: the demo service served by `oocrpc-demo` and used in tests.

use serde::{Deserialize, Serialize};

use crate::registry::{MethodSet, RpcService};
use crate::types::BackendError;

/// Operands of a binary operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Args {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub c: i64,
}

/// Integer arithmetic. Overflow wraps.
#[derive(Debug, Default, Clone, Copy)]
pub struct Arith;

impl Arith {
    pub fn add(&self, args: Args, reply: &mut Reply) -> Result<(), BackendError> {
        reply.c = args.a.wrapping_add(args.b);
        Ok(())
    }

    pub fn mul(&self, args: Args, reply: &mut Reply) -> Result<(), BackendError> {
        reply.c = args.a.wrapping_mul(args.b);
        Ok(())
    }

    pub fn div(&self, args: Args, reply: &mut Reply) -> Result<(), BackendError> {
        if args.b == 0 {
            return Err("divide by zero".into());
        }
        reply.c = args.a.wrapping_div(args.b);
        Ok(())
    }

    /// Always fails; exercises error propagation.
    pub fn n_error(&self, _args: Args, _reply: &mut Reply) -> Result<(), BackendError> {
        Err("normalerror".into())
    }

    pub fn simple_value(&self, arg: i64, reply: &mut bool) -> Result<(), BackendError> {
        *reply = arg == 2;
        Ok(())
    }
}

impl RpcService for Arith {
    fn methods(set: &mut MethodSet<Self>) {
        set.method("Add", Arith::add)
            .method("Mul", Arith::mul)
            .method("Div", Arith::div)
            .method("NError", Arith::n_error)
            .method("SimpleValue", Arith::simple_value);
    }
}
