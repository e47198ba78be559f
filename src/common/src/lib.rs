// Copyright 2025 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared building blocks of the riverflow pipeline: the event model, the
//! request/response stream protocol, the keyed bulk buffer, the document
//! path accessor and the match engine.

pub mod buffer;
pub mod command;
pub mod docpath;
pub mod error;
pub mod event;
pub mod matcher;
pub mod stream;

pub use error::{FlowError, Result};
pub use event::{Event, EventAction, EventResult};
