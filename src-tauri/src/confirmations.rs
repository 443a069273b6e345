use rfd::{AsyncMessageDialog, MessageButtons, MessageDialogResult, MessageLevel};

use crate::org_actions::ConfirmationPrompt;

const DIALOG_TITLE: &str = "Org List";

pub(crate) async fn confirm(prompt: &ConfirmationPrompt) -> bool {
    let result = AsyncMessageDialog::new()
        .set_level(MessageLevel::Info)
        .set_title(DIALOG_TITLE)
        .set_description(prompt.message.as_str())
        .set_buttons(MessageButtons::OkCancelCustom(
            prompt.accept_label.clone(),
            prompt.cancel_label.clone(),
        ))
        .show()
        .await;

    is_accepted(&result, prompt)
}

/// Backends that cannot render custom labels fall back to Ok/Yes.
fn is_accepted(result: &MessageDialogResult, prompt: &ConfirmationPrompt) -> bool {
    match result {
        MessageDialogResult::Custom(label) => label == &prompt.accept_label,
        MessageDialogResult::Ok | MessageDialogResult::Yes => true,
        _ => false,
    }
}
