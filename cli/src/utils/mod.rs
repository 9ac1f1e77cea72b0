pub mod env_paths;
