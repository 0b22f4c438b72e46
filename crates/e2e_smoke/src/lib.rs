//! End-to-end smoke tests for the casework server live under `tests/`.
