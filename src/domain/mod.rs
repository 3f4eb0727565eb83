/// Domain layer - core business models and the external contract
///
/// These models are platform-agnostic and represent core pipeline entities.
pub mod events;
pub mod language;
pub mod models;
pub mod prompts;

pub use events::{EventData, IpcCommand, PipelineEvent, PipelineState};
pub use models::{
    CoalescedSegment, CombinedSentence, Paragraph, ParagraphStatus, Summary, TranscriptSegment,
    Translation, TranslationPriority, TranslationRequest, TranslationTier, VocabularyItem,
};
pub use prompts::PromptTemplates;
