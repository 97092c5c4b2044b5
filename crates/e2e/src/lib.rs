//! tablecheck browser verification toolkit
//!
//! Helpers for end-to-end scenarios against a single-page application
//! built around a virtualised data table:
//! - custom count matchers composed into an assertion context
//! - tab coordination for actions that open a new page
//! - response waiting for the application's JSON API
//! - table interaction (filter, select, row and column lookup)
//! - visual comparison of element screenshots
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Scenario (tokio::test)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Expect                                                     │
//! │    ├── MatcherRegistry (to_have_at_most / at_least)         │
//! │    ├── built-ins (count, visible, text, class, url)         │
//! │    └── VisualTester (to_match_screenshot)                   │
//! │  TabCoordinator::open(TabOptions) -> TabHandle              │
//! │  ResponseWaiter::wait::<T>(page, ApiNamespace, method)      │
//! │  TableInteractor                                            │
//! │    ├── filter / select / find                               │
//! │    └── get_rows / get_column / context_column               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  driver: Page, Locator, BrowserContext                      │
//! │    └── sim: in-memory browser with the table widget         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod assertion;
pub mod config;
pub mod driver;
pub mod error;
pub mod expect;
pub mod logging;
pub mod matchers;
pub mod response;
pub mod sim;
pub mod tab;
pub mod table;
pub mod visual;

pub use config::HarnessConfig;
pub use error::{E2eError, E2eResult};
pub use expect::Expect;
pub use matchers::MatcherRegistry;
pub use response::{ApiNamespace, Envelope, ResponseWaiter};
pub use tab::{TabCoordinator, TabHandle, TabOptions};
pub use table::{MenuOption, RowCriterion, RowKind, TableInteractor};
