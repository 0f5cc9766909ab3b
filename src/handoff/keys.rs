//! Shared storage key names
//!
//! Both processes agree on these. Each key holds one self-contained JSON
//! value; nothing relies on two keys changing together.

/// Ordered list of finalized chunk records
pub const PENDING_CHUNKS: &str = "pendingChunks";

/// Chunk id the consumer publishes before requesting a chunk start
pub const PENDING_CHUNK_ID: &str = "pendingChunkId";

/// Producer heartbeat and coarse state
pub const EXTENSION_STATUS: &str = "extensionStatus";

// Recording-enabled flags, written by the controlling process
pub const MIC_ENABLED: &str = "micEnabled";
pub const APP_AUDIO_ENABLED: &str = "appAudioEnabled";
pub const SEPARATE_AUDIO: &str = "separateAudio";

// Last finished chunk, for consumers without chunk ids
pub const LAST_VIDEO_FILE: &str = "lastVideoFile";
pub const LAST_MIC_AUDIO_FILE: &str = "lastMicAudioFile";
pub const LAST_APP_AUDIO_FILE: &str = "lastAppAudioFile";
pub const LAST_MIC_ENABLED: &str = "lastMicEnabled";
pub const LAST_HAD_SEPARATE_AUDIO: &str = "lastHadSeparateAudio";
