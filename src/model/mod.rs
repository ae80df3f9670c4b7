// Copyright 2024 OctoFHIR Team
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

//! Value model for template expressions

pub mod datetime;
pub mod host;
pub mod value;

pub use datetime::{DateInput, DateUnit, normalize_date_time, value_to_date_time};
pub use host::{
    Builtin, HostValue, INPUT_METHODS, NODE_REF_METHODS, NODE_REF_PROPERTIES, Namespace,
    is_host_method,
};
pub use value::{Lambda, ObjectMap, Value, ValueKind, format_date_time, format_number};
