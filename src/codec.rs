// Copyright (c) 2023 Octavian Oncescu
// Copyright (c) 2023-2024 The Aquila Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use bincode::enc::write::Writer;

pub const CODEC_BYTES_LIMIT: usize = 1_000_000;

pub fn encode_to_vec<T: bincode::Encode>(val: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::encode_to_vec(val, config)
}

pub fn encode<W: Writer, T: bincode::Encode>(
    writer: W,
    val: &T,
) -> Result<(), bincode::error::EncodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::encode_into_writer(val, writer, config)
}

pub fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, bincode::error::DecodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::decode_from_slice(bytes, config).map(|r| r.0)
}
