/// heritage_risk: multi-hazard risk scoring for heritage sites.
///
/// # Module structure
///
/// ```text
/// heritage_risk
/// ├── model       — shared data types (Site, HazardObservation, RiskProfile, …)
/// ├── geometry    — point/polygon geometry with GeoJSON parsing
/// ├── projection  — LAEA Europe projection: distances, areas, buffers
/// ├── config      — engine configuration loader (risk.toml)
/// ├── logging     — tracing subscriber setup
/// ├── spatial     — projected inputs, site buffers
/// │   ├── index   — uniform grid index over metric points
/// │   ├── nearest — nearest-site attribution (advisory cache)
/// │   └── radius  — radius-bounded many-to-many join
/// ├── scoring     — per-site raw aggregates
/// │   ├── urban, climate, seismic, fire, flood, coastal
/// │   ├── normalize — log1p + batch min-max
/// │   └── composite — weighted sum and risk levels
/// ├── anomaly     — isolation forest over the sub-score matrix
/// ├── density     — Gaussian KDE of urban features
/// ├── db          — PostgreSQL connection and schema validation
/// ├── repository  — store boundary (in-memory and PostGIS)
/// └── pipeline    — one scoring run, end to end
/// ```

/// Public modules
pub mod anomaly;
pub mod config;
pub mod db;
pub mod density;
pub mod geometry;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod projection;
pub mod repository;
pub mod scoring;
pub mod spatial;
