mod common;
mod drive_service;
mod logging;
mod pdo_handler;
