use thiserror::Error;

#[derive(Error, Debug)]
pub enum HatError {
    #[error("Key length {len} exceeds the 16383-byte limit")]
    KeyTooLong { len: usize },

    #[error("Aux size {aux} leaves no room for a record in the largest array class")]
    AuxTooLarge { aux: usize },

    #[error("Boot level {boot} exceeds the supported maximum of 3")]
    BootTooDeep { boot: u32 },
}
