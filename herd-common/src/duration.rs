// Copyright 2026 foyer Project Authors
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

use std::time::Duration;

/// Extension for [`std::time::Duration`].
pub trait DurationExt {
    /// Normalize the duration to a millisecond count, saturating at [`u64::MAX`].
    fn as_millis_u64(&self) -> u64;
}

impl DurationExt for Duration {
    fn as_millis_u64(&self) -> u64 {
        u64::try_from(self.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Normalize an optional duration to an optional millisecond count. [`None`] means no expiry.
pub fn millis(duration: Option<Duration>) -> Option<u64> {
    duration.map(|d| d.as_millis_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis() {
        assert_eq!(millis(None), None);
        assert_eq!(millis(Some(Duration::from_secs(5))), Some(5000));
        assert_eq!(millis(Some(Duration::from_micros(1500))), Some(1));
        assert_eq!(millis(Some(Duration::MAX)), Some(u64::MAX));
    }
}
