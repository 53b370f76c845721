// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Compiled YANG schema: typedefs, schema nodes, and the multi-pass
//! resolver that turns tokenized module declarations into a usable tree.

/// Tokenized, unresolved module declarations (resolver input).
pub mod ast;
/// The four-pass typedef and schema resolver.
pub mod resolve;
/// Compiled schema tree and module registry.
pub mod schema;
/// Fully resolved type descriptions and value checking.
pub mod typedef;
