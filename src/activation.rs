//! Activation functions.
//!
//! An activation neuron reads a single source neuron `net` and emits `f(net)`.
//! Training needs the first derivative; the R-algorithm Hessian also needs the
//! second, so every function evaluates all three at once.
//!
//! Each function has a stable integer code used by the flat serialization format.

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
/// Element-wise activation function.
pub enum ActivationFn {
    /// `tanh(net)`, saturated to `sign(net)` for `|net| >= 100`.
    Tanh,
    /// Gaussian bump `exp(-net^2)`.
    Gaussian,
    /// Positive, unbounded above: `exp(net)` for `net < 0`, `net + sqrt(net^2 + 1)` otherwise.
    Ex,
    /// Identity.
    Linear,
}

/// Value and first two derivatives of an activation at one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derivatives {
    pub f: f64,
    pub df: f64,
    pub d2f: f64,
}

impl ActivationFn {
    /// Stable code stored in serialized networks.
    #[inline]
    pub fn code(self) -> i64 {
        match self {
            ActivationFn::Tanh => 1,
            ActivationFn::Gaussian => 2,
            ActivationFn::Ex => 3,
            ActivationFn::Linear => -5,
        }
    }

    /// Inverse of [`ActivationFn::code`].
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(ActivationFn::Tanh),
            2 => Ok(ActivationFn::Gaussian),
            3 => Ok(ActivationFn::Ex),
            -5 => Ok(ActivationFn::Linear),
            _ => Err(Error::InvalidConfig(format!(
                "unknown activation function code {code}"
            ))),
        }
    }

    #[inline]
    pub fn eval(self, net: f64) -> Derivatives {
        match self {
            ActivationFn::Linear => Derivatives {
                f: net,
                df: 1.0,
                d2f: 0.0,
            },
            ActivationFn::Tanh => {
                let f = if net.abs() < 100.0 {
                    net.tanh()
                } else if net > 0.0 {
                    1.0
                } else {
                    -1.0
                };
                let df = 1.0 - f * f;
                Derivatives {
                    f,
                    df,
                    d2f: -2.0 * f * df,
                }
            }
            ActivationFn::Ex => {
                if net >= 0.0 {
                    let arg = net * net + 1.0;
                    let root = arg.sqrt();
                    let r = net / root;
                    Derivatives {
                        f: net + root,
                        df: 1.0 + r,
                        d2f: (root - net * r) / arg,
                    }
                } else {
                    let f = net.exp();
                    Derivatives { f, df: f, d2f: f }
                }
            }
            ActivationFn::Gaussian => {
                let f = (-net * net).exp();
                let df = -2.0 * net * f;
                Derivatives {
                    f,
                    df,
                    d2f: -2.0 * (f + df * net),
                }
            }
        }
    }
}
