pub mod cipher;
pub mod document_repository;
pub mod gateway;
pub mod key_allocator;
pub mod pipeline;
pub mod processing;
pub mod saga;
pub mod signing;
pub mod storage_service;
pub mod validation;
