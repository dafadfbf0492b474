//! localmin - local minimization of smooth functions.
//!
//! localmin provides the classic family of local minimizers on top of
//! `ndarray`: gradient methods with strong Wolfe line searches (nonlinear
//! conjugate gradient, BFGS, Newton-CG), derivative-free methods (Powell,
//! Nelder-Mead), bound-constrained methods (L-BFGS-B, TNC) and scalar
//! minimizers (Brent, golden-section, bounded).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  minimize() / minimize_scalar()   method dispatch        │
//! ├───────────────┬───────────────────┬──────────────────────┤
//! │ minimize/     │ bounded/          │ scalar/              │
//! │ CG, BFGS,     │ L-BFGS-B, TNC     │ Brent, golden,       │
//! │ Newton-CG,    │                   │ bounded, bracket     │
//! │ Powell, NM    │                   │                      │
//! ├───────────────┴───────────────────┴──────────────────────┤
//! │  line_search/ (Moré–Thuente, zoom)   FunctionEvaluator   │
//! ├──────────────────────────────────────────────────────────┤
//! │  Problem, Bounds, OptimizeError                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every run creates a fresh [`optimize::FunctionEvaluator`], so the call
//! counts in a result are exactly the user callback invocations of that run.
//! Progress is reported through `tracing`; the library never installs a
//! subscriber.

pub mod optimize;
