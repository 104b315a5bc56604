//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                                            |
//! |-----------|-------------------------------------------------------------|
//! | `project` | `Init`                                                      |
//! | `serve`   | `Serve`                                                     |
//! | `session` | `Create`, `Activate`, `Show`, `List`, `Advance`, `Feedback`, `Sweep`, `Stats` |
//! | `config`  | `Config`                                                    |

pub mod config;
pub mod project;
pub mod serve;
pub mod session;

pub use config::cmd_config;
pub use project::cmd_init;
pub use serve::cmd_serve;
pub use session::{
    cmd_activate, cmd_advance, cmd_create, cmd_feedback, cmd_list, cmd_show, cmd_stats, cmd_sweep,
};
