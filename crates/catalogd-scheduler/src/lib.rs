// SPDX-License-Identifier: GPL-3.0-or-later
pub mod driver;
pub mod worker;

pub use driver::Scheduler;
pub use worker::Worker;
