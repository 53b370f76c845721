// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The three-phase `<edit-config>` engine: plan construction from a parsed
//! payload, then validate / apply / commit-or-rollback over a scratch copy
//! of the target datastore.

/// Phase driver and transaction state machine.
pub mod engine;
/// Delta-tree plan model and payload parsing.
pub mod plan;
