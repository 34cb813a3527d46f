//! Test engine for tangle programs.
//!
//! [`TestEngine`] runs a test entry for many iterations under one exploration
//! strategy, collects every bug into a [`TestReport`], and writes replayable
//! schedule files for failing iterations. Configuration comes from
//! [`TestConfig`], in code or from a JSON/TOML file.
//!
//! ```no_run
//! use tangle_tester::{test_entry, TestConfig, TestEngine};
//!
//! let engine = TestEngine::new(TestConfig::default().with_iterations(1000))?;
//! let report = engine.run(&test_entry(|_ctx| Ok(())))?;
//! assert!(report.passed());
//! # Ok::<(), tangle_tester::EngineError>(())
//! ```

// Error variants are documented on the error enums.
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod engine;
pub mod report;

pub use config::{ConfigError, StrategyConfig, TestConfig};
pub use engine::{test_entry, EngineError, TestEngine};
pub use report::{BugReport, ReportError, TestReport};
