/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */
#![allow(unused)]

use fbus::prelude::*;

#[bus_message(command)]
pub struct Ping {
    pub from: String,
}

#[bus_message(command)]
pub struct Pong {
    pub to: String,
}

#[bus_message(event, name = "orders.placed")]
pub struct OrderPlaced {
    pub order_id: u64,
    pub customer_name: Option<String>,
}

// a unit of work that fails on request
#[bus_message(command)]
pub struct Work {
    pub id: u32,
    pub fail: bool,
}

#[bus_message(command)]
pub struct Slow {
    pub millis: u64,
}
