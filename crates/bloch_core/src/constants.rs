/// Neutron gyromagnetic ratio (rad s^-1 T^-1, CODATA 2018). Negative: the
/// magnetic moment points against the spin.
pub const GAMMA_NEUTRON: f64 = -1.832_471_71e8;

/// Proton gyromagnetic ratio (rad s^-1 T^-1)
pub const GAMMA_PROTON: f64 = 2.675_221_874_4e8;

/// Electron gyromagnetic ratio (rad s^-1 T^-1)
pub const GAMMA_ELECTRON: f64 = -1.760_859_630_23e11;

/// Looks up the ratio for a particle by name.
pub fn gyromagnetic_ratio(particle: &str) -> Option<f64> {
    match particle {
        "neutron" => Some(GAMMA_NEUTRON),
        "proton" => Some(GAMMA_PROTON),
        "electron" => Some(GAMMA_ELECTRON),
        _ => None,
    }
}
