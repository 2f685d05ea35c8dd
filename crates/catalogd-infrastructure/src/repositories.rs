// SPDX-License-Identifier: GPL-3.0-or-later
//! Catalog store (C1): CRUD over every entity plus the two derived
//! queries the scheduler and task handlers need.
//!
//! Every mutating function takes an already-open transaction and never
//! commits it. A single SQLite writer makes a generic
//! swappable-backend trait unnecessary here, so these are plain functions
//! over a `Tx` rather than a `Repository<T>` trait object — there is only
//! ever one backend to satisfy.

/// An open write transaction. Functions taking `&mut Tx` never call
/// `commit`/`rollback` themselves; the caller decides the checkpoint.
pub type Tx<'a> = sqlx::Transaction<'a, sqlx::Sqlite>;
