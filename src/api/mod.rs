// Entry points for hosts embedding the launcher.

pub mod launcher;
