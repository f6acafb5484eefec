// Copyright 2025 eraflo
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

use std::time::Instant;

// ANSI color codes
pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const GREEN: &str = "\x1b[32m";
pub const RED: &str = "\x1b[31m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";

pub const CHECK: &str = "✓";
pub const CROSS: &str = "✗";
pub const WARN: &str = "⚠";
pub const PACKAGE: &str = "📦";

pub fn print_task_start(task_name: &str, emoji: &str, color: &str) {
    println!(
        "\n{}{}━━━ {} {} {}━━━{}",
        BOLD, color, emoji, task_name, emoji, RESET
    );
}

pub fn print_success(message: &str) {
    println!("{}{} {} {}{}", BOLD, GREEN, CHECK, message, RESET);
}

pub fn print_warning(message: &str) {
    eprintln!("{}{} {} {}{}", BOLD, YELLOW, WARN, message, RESET);
}

pub fn print_error(message: &str) {
    eprintln!("{}{} {} {}{}", BOLD, RED, CROSS, message, RESET);
}

/// Prints how long a task took since `start`.
pub fn print_elapsed(task_name: &str, start: Instant) {
    println!(
        "{}{}{} finished in {:.2}s{}",
        BOLD,
        CYAN,
        task_name,
        start.elapsed().as_secs_f64(),
        RESET
    );
}
