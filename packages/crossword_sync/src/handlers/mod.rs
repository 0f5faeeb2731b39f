pub mod admin;
pub mod explanations;
pub mod health;
pub mod puzzles;
pub mod sessions;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use admin::{
    admin_adhoc_handler, admin_regenerate_handler, get_database_stats, list_reports_handler,
};
pub use explanations::{explain_handler, job_status_handler, regenerate_handler, report_handler};
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use puzzles::{create_puzzle_handler, get_puzzle_handler};
pub use sessions::{
    attributions_handler, claim_handler, create_session_handler, get_session_handler,
    hint_handler, replace_state_handler, update_cell_handler,
};
pub use websocket::{session_events_handler, sync_socket_handler};
