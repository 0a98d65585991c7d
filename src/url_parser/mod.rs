// RipStream Core - Music Streaming Download Engine
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! URL parsing and service detection
//!
//! Maps a pasted streaming URL to `(service, content type, content id)`.

pub mod parser;
pub mod patterns;
pub mod validator;

pub use parser::{content_type_from_url, detect_service_from_url, parse_url, ParsedUrl, UrlParser};
pub use validator::{validate_url, UrlValidator};
