//! Notice dispatch through the error handler chain.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, error};

/// Longest piece of a notice handed to a handler in one call.
pub const NOTICE_CHUNK_SIZE: usize = 1000;

/// Receives notices and warnings for one connection.
///
/// Handlers are consulted newest first. Returning `false` stops the notice
/// from reaching older handlers.
pub trait ErrorHandler {
    /// Handle one newline-terminated message.
    fn handle(&mut self, message: &str) -> bool;

    /// Called when the connection lets go of this handler during `close`.
    fn unregistered(&mut self) {}
}

impl<F> ErrorHandler for F
where
    F: FnMut(&str) -> bool,
{
    fn handle(&mut self, message: &str) -> bool {
        self(message)
    }
}

/// Identifies a registered error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// The chain of error handlers of one connection.
#[derive(Default)]
pub(crate) struct NoticeDispatcher {
    handlers: Vec<(HandlerId, Box<dyn ErrorHandler>)>,
    next_id: u64,
}

impl NoticeDispatcher {
    pub(crate) fn register(&mut self, handler: Box<dyn ErrorHandler>) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers.push((id, handler));
        id
    }

    pub(crate) fn unregister(&mut self, id: HandlerId) -> Option<Box<dyn ErrorHandler>> {
        let pos = self.handlers.iter().position(|(h, _)| *h == id)?;
        Some(self.handlers.remove(pos).1)
    }

    pub(crate) fn ids(&self) -> Vec<HandlerId> {
        self.handlers.iter().map(|(id, _)| *id).collect()
    }

    /// Remove every handler, newest first, telling each one.
    pub(crate) fn unregister_all(&mut self) {
        let handlers = std::mem::take(&mut self.handlers);
        for (_, mut handler) in handlers.into_iter().rev() {
            if catch_unwind(AssertUnwindSafe(|| handler.unregistered())).is_err() {
                error!("error handler panicked while being unregistered");
            }
        }
    }

    /// Dispatch a raw message, chunked and newline-terminated.
    ///
    /// Bytes that are not UTF-8 are replaced with U+FFFD.
    pub(crate) fn process(&mut self, message: &[u8]) {
        if message.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(message);
        debug!(notice = %text.trim_end(), "server notice");
        for chunk in chunks(&text) {
            self.process_raw(&chunk);
        }
    }

    fn process_raw(&mut self, chunk: &str) {
        for (_, handler) in self.handlers.iter_mut().rev() {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(chunk))) {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => error!("error handler panicked"),
            }
        }
    }
}

/// Split `text` into pieces of at most `NOTICE_CHUNK_SIZE` bytes on char
/// boundaries, each ending in a newline.
fn chunks(text: &str) -> Vec<String> {
    if text.len() <= NOTICE_CHUNK_SIZE {
        let mut only = text.to_string();
        if !only.ends_with('\n') {
            only.push('\n');
        }
        return vec![only];
    }

    let mut out = Vec::with_capacity(text.len() / NOTICE_CHUNK_SIZE + 1);
    let mut rest = text;
    while !rest.is_empty() {
        let mut end = rest.len().min(NOTICE_CHUNK_SIZE);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        // A lone trailing terminator belongs to the last piece.
        if rest.get(end..) == Some("\n") {
            end = rest.len();
        }
        let (piece, tail) = rest.split_at(end);
        let mut chunk = piece.to_string();
        if !chunk.ends_with('\n') {
            chunk.push('\n');
        }
        out.push(chunk);
        rest = tail;
    }
    out
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    fn recorder(log: &Rc<RefCell<Vec<String>>>, tag: &'static str, pass: bool) -> Box<dyn ErrorHandler> {
        let log = Rc::clone(log);
        Box::new(move |msg: &str| {
            log.borrow_mut().push(format!("{}:{}", tag, msg));
            pass
        })
    }

    #[test]
    fn newest_handler_first_and_veto() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut dispatcher = NoticeDispatcher::default();
        dispatcher.register(recorder(&log, "old", true));
        let vetoing = dispatcher.register(recorder(&log, "new", false));

        dispatcher.process(b"hello");
        assert_eq!(*log.borrow(), vec!["new:hello\n".to_string()]);

        dispatcher.unregister(vetoing);
        log.borrow_mut().clear();
        dispatcher.process(b"again\n");
        assert_eq!(*log.borrow(), vec!["old:again\n".to_string()]);
    }

    #[test]
    fn long_message_is_chunked_without_loss() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut dispatcher = NoticeDispatcher::default();
        dispatcher.register(recorder(&log, "h", true));

        let message: String = (0..2000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        dispatcher.process(message.as_bytes());

        let chunks: Vec<String> = log
            .borrow()
            .iter()
            .map(|m| m.strip_prefix("h:").unwrap().to_string())
            .collect();
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.ends_with('\n')));
        assert!(chunks.iter().all(|c| c.len() <= NOTICE_CHUNK_SIZE + 1));
        let rebuilt: String = chunks.iter().map(|c| c.strip_suffix('\n').unwrap()).collect();
        assert_eq!(rebuilt, message);
    }

    #[test]
    fn chunks_respect_char_boundaries() {
        let message = "é".repeat(700);
        let pieces = chunks(&message);
        let rebuilt: String = pieces.iter().map(|c| c.strip_suffix('\n').unwrap()).collect();
        assert_eq!(rebuilt, message);
    }

    #[test]
    fn trailing_newline_stays_with_last_chunk() {
        let message = format!("{}\n", "a".repeat(NOTICE_CHUNK_SIZE));
        assert_eq!(chunks(&message), vec![message.clone()]);

        let longer = format!("{}\n", "b".repeat(2 * NOTICE_CHUNK_SIZE));
        let pieces = chunks(&longer);
        assert_eq!(pieces.len(), 2);
        assert!(pieces.iter().all(|c| c.len() == NOTICE_CHUNK_SIZE + 1));
        let half = format!("{}\n", "b".repeat(NOTICE_CHUNK_SIZE));
        assert_eq!(pieces, vec![half.clone(), half]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut dispatcher = NoticeDispatcher::default();
        dispatcher.register(recorder(&log, "h", true));
        dispatcher.process(&[b'x', 0xE9, b'y']);
        assert_eq!(*log.borrow(), vec!["h:x\u{FFFD}y\n".to_string()]);
    }

    #[test]
    fn panicking_handler_does_not_stop_chain() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut dispatcher = NoticeDispatcher::default();
        dispatcher.register(recorder(&log, "old", true));
        dispatcher.register(Box::new(|_: &str| -> bool { panic!("boom") }));
        dispatcher.process(b"x\n");
        assert_eq!(*log.borrow(), vec!["old:x\n".to_string()]);
    }

    #[test]
    fn unregister_all_is_newest_first() {
        struct Named(&'static str, Rc<RefCell<Vec<&'static str>>>);
        impl ErrorHandler for Named {
            fn handle(&mut self, _: &str) -> bool {
                true
            }
            fn unregistered(&mut self) {
                self.1.borrow_mut().push(self.0);
            }
        }
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut dispatcher = NoticeDispatcher::default();
        dispatcher.register(Box::new(Named("first", Rc::clone(&order))));
        dispatcher.register(Box::new(Named("second", Rc::clone(&order))));
        dispatcher.unregister_all();
        assert_eq!(*order.borrow(), vec!["second", "first"]);
        assert!(dispatcher.ids().is_empty());
    }
}
