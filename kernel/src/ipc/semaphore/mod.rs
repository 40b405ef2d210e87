// SPDX-License-Identifier: MPL-2.0

//! Semaphore for the system. Only System V semaphores are provided.

pub mod system_v;
