// ============================================================
// Layer 4 — Style Analysis
// ============================================================
// Quantifies one person's writing style as a vector of named,
// normalized feature scores, and measures how closely a
// generated candidate matches it.
//
// The profiler is a pure function of its input corpus and
// configuration — no file I/O, no external state — so the same
// corpus always produces the same signature.

/// Builds StyleProfiles and scores candidates against them
pub mod profiler;
