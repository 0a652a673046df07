pub mod flash_nvs;
pub mod sd_fs;
