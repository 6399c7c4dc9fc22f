pub mod cmd_defs;
