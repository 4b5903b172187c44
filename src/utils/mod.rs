// ABOUTME: Utility modules for common functionality across the application
// ABOUTME: Certificate/key loading for the mTLS admission server
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

/// Certificate and private-key loading (C7)
pub mod tls;
