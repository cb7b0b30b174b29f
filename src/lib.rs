// src/lib.rs

//! walletwatch: polls wallet activity, flags spam and failed transactions,
//! and forwards new activity to bot chats.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
