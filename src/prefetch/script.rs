//! The browser half of the prefetch engine, inlined into the home page.

/// Script source, self-invoking, with no external dependencies.
pub const PREFETCH_JS: &str = include_str!("../../assets/prefetch.js");

/// `<script>` element appended to the home page `<body>`.
pub const SCRIPT_TAG: &str = concat!("<script>\n", include_str!("../../assets/prefetch.js"), "</script>");
