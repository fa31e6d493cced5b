pub mod user {
    tonic::include_proto!("user");
}

pub mod product {
    tonic::include_proto!("product");
}

pub mod event {
    tonic::include_proto!("event");
}

/// Encoded descriptors of every service, for gRPC server reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("catalog_descriptor");
