pub mod keys {

    /// Uppercase letters and digits, the alphabet of every access key code.
    pub const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    pub const MIN_CODE_LENGTH: usize = 8;

    pub const MAX_CODE_LENGTH: usize = 16;

    pub const MAX_GENERATION_ATTEMPTS: usize = 64;

    pub const MAX_BATCH_SIZE: usize = 500;
}

pub mod limits {

    pub const DEFAULT_AUDIT_LIMIT: u64 = 50;

    pub const MAX_AUDIT_LIMIT: u64 = 1000;

    /// Upper bound on the body excerpt kept in audit details and errors.
    pub const MAX_BODY_EXCERPT: usize = 300;
}

pub mod passwords {

    pub const MIN_LENGTH: usize = 8;
}

pub mod tradingview {
    pub const MAX_USERNAME_LENGTH: usize = 64;

    /// Longest finite grant, in days. Longer requests should use `lifetime`.
    pub const MAX_GRANT_DAYS: u64 = 36_600;
}
