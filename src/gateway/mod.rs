//! MT5 Gateway Integration
//!
//! Live broker backed by an HTTP bridge in front of a MetaTrader 5 terminal.
//!
//! # Components
//!
//! - [`client`] - HTTP client and per-iteration session
//! - [`models`] - Request/response data types
//!
//! # Environment Variables
//!
//! - `MT5_LOGIN` - Trading account number
//! - `MT5_PASSWORD` - Trading account password
//! - `MT5_SERVER` - Broker server name
//! - `MT5_GATEWAY_URL` (optional) - Bridge address
//!
//! # API Endpoints Used
//!
//! - `POST /auth/login`, `POST /auth/logout` - Session
//! - `GET /rates?symbol=...&timeframe=...&count=...` - Recent bars
//! - `GET /tick?symbol=...` - Current bid/ask
//! - `GET /positions?symbol=...` - Open positions
//! - `GET /history/deals?from=...&to=...` - Deal history
//! - `POST /order/send` - Market orders (retcode 10009 = done)

pub mod client;
pub mod models;

pub use client::{GatewayClient, GatewaySession};
