// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fuzz target for logical path parsing and the directory-prefix helpers

#![no_main]

use keel_core::path::{normalize_dir, relative_name, LogicalPath};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    let dir = normalize_dir(input);
    assert!(dir.ends_with('/'));
    assert_eq!(normalize_dir(&dir), dir);

    if let Ok(path) = LogicalPath::new(input) {
        // Parsing is stable and never yields anything that climbs out of a root
        assert_eq!(LogicalPath::new(path.as_str()).ok().as_ref(), Some(&path));
        assert!(path.segments().all(|s| !s.is_empty() && s != "." && s != ".."));

        let prefix = path.as_dir();
        let child = format!("{prefix}{}", path.name());
        assert_eq!(relative_name(&prefix, &child).ok(), Some(path.name()));

        if let Some(parent) = path.parent() {
            assert!(path.starts_with(&parent));
        }
        let _ = path.join(path.name());
    }
});
