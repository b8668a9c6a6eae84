//! Command handler for the RESP listener

use std::sync::Arc;
use std::time::Duration;

use shelfstore::wire::Frame;
use shelfstore::{CacheStore, Error, MAX_TTL};

/// Keys returned per SCAN page when the client gives no COUNT
const DEFAULT_SCAN_COUNT: usize = 10;

/// Executes RESP commands against one store
pub struct CommandHandler {
    store: Arc<dyn CacheStore>,
}

impl CommandHandler {
    /// Handler serving `store`
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Run one command frame and produce the reply frame
    pub async fn handle(&self, cmd: Frame) -> Frame {
        let arr = match cmd {
            Frame::Array(Some(arr)) if !arr.is_empty() => arr,
            _ => return Frame::error("invalid command format"),
        };

        let command = match arr[0].as_bytes() {
            Some(cmd) => String::from_utf8_lossy(cmd).to_uppercase(),
            None => return Frame::error("invalid command"),
        };
        let args = &arr[1..];

        match command.as_str() {
            "PING" => self.handle_ping(args),
            "ECHO" => self.handle_echo(args),
            "GET" => self.handle_get(args).await,
            "SET" => self.handle_set(args).await,
            "DEL" => self.handle_del(args).await,
            "EXISTS" => self.handle_exists(args).await,
            "KEYS" => self.handle_keys(args).await,
            "SCAN" => self.handle_scan(args).await,
            "INCR" => self.handle_incr(args).await,
            "PEXPIRE" => self.handle_expire(args, "pexpire", Duration::from_millis).await,
            "EXPIRE" => self.handle_expire(args, "expire", Duration::from_secs).await,
            "DBSIZE" => self.handle_dbsize().await,
            "FLUSHDB" => self.handle_flushdb().await,
            "INFO" => self.handle_info().await,
            "COMMAND" => self.handle_command(),
            _ => Frame::error(format!("unknown command '{}'", command)),
        }
    }

    fn handle_ping(&self, args: &[Frame]) -> Frame {
        match args {
            [] => Frame::Simple("PONG".to_string()),
            [message] => message.clone(),
            _ => wrong_arity("ping"),
        }
    }

    fn handle_echo(&self, args: &[Frame]) -> Frame {
        match args {
            [message] => message.clone(),
            _ => wrong_arity("echo"),
        }
    }

    async fn handle_get(&self, args: &[Frame]) -> Frame {
        let [key] = args else {
            return wrong_arity("get");
        };
        let Some(key) = text(key) else {
            return Frame::error("invalid key");
        };

        match self.store.get(&key).await {
            Ok(Some(value)) => Frame::bulk(value),
            Ok(None) => Frame::nil(),
            Err(e) => store_error(e),
        }
    }

    async fn handle_set(&self, args: &[Frame]) -> Frame {
        let (key, value, options) = match args {
            [key, value, options @ ..] => (key, value, options),
            _ => return wrong_arity("set"),
        };
        let Some(key) = text(key) else {
            return Frame::error("invalid key");
        };
        let Some(value) = value.as_bytes() else {
            return Frame::error("invalid value type");
        };

        let ttl = match options {
            [] => None,
            [unit, amount] => {
                let amount = match text(amount).and_then(|s| s.parse::<u64>().ok()) {
                    Some(n) if n > 0 => n,
                    _ => return Frame::error("invalid expire time in 'set' command"),
                };
                let ttl = match text(unit).map(|u| u.to_uppercase()).as_deref() {
                    Some("EX") => Duration::from_secs(amount),
                    Some("PX") => Duration::from_millis(amount),
                    _ => return Frame::error("syntax error"),
                };
                if ttl > MAX_TTL {
                    return Frame::error("invalid expire time in 'set' command");
                }
                Some(ttl)
            }
            _ => return Frame::error("syntax error"),
        };

        match self.store.set(&key, value.to_vec(), ttl).await {
            Ok(()) => Frame::ok(),
            Err(e) => store_error(e),
        }
    }

    async fn handle_del(&self, args: &[Frame]) -> Frame {
        if args.is_empty() {
            return wrong_arity("del");
        }

        let mut deleted = 0i64;
        for key in args.iter().filter_map(text) {
            match self.store.delete(&key).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => return store_error(e),
            }
        }
        Frame::Integer(deleted)
    }

    async fn handle_exists(&self, args: &[Frame]) -> Frame {
        if args.is_empty() {
            return wrong_arity("exists");
        }

        let mut count = 0i64;
        for key in args.iter().filter_map(text) {
            match self.store.exists(&key).await {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => return store_error(e),
            }
        }
        Frame::Integer(count)
    }

    async fn handle_keys(&self, args: &[Frame]) -> Frame {
        let [pattern] = args else {
            return wrong_arity("keys");
        };
        let Some(pattern) = text(pattern) else {
            return Frame::error("invalid pattern");
        };

        match self.store.keys(&pattern).await {
            Ok(keys) => Frame::Array(Some(keys.into_iter().map(Frame::bulk).collect())),
            Err(e) => store_error(e),
        }
    }

    async fn handle_scan(&self, args: &[Frame]) -> Frame {
        let Some((cursor, options)) = args.split_first() else {
            return wrong_arity("scan");
        };
        let Some(cursor) = text(cursor).and_then(|s| s.parse::<u64>().ok()) else {
            return Frame::error("invalid cursor");
        };

        let mut pattern = "*".to_string();
        let mut count = DEFAULT_SCAN_COUNT;
        for pair in options.chunks(2) {
            let [option, value] = pair else {
                return Frame::error("syntax error");
            };
            let Some(value) = text(value) else {
                return Frame::error("syntax error");
            };
            match text(option).map(|o| o.to_uppercase()).as_deref() {
                Some("MATCH") => pattern = value,
                Some("COUNT") => match value.parse::<usize>() {
                    Ok(n) if n > 0 => count = n,
                    _ => return Frame::error("value is not an integer or out of range"),
                },
                _ => return Frame::error("syntax error"),
            }
        }

        match self.store.scan(cursor, &pattern, count).await {
            Ok(page) => Frame::Array(Some(vec![
                Frame::bulk(page.cursor.to_string()),
                Frame::Array(Some(page.keys.into_iter().map(Frame::bulk).collect())),
            ])),
            Err(e) => store_error(e),
        }
    }

    async fn handle_incr(&self, args: &[Frame]) -> Frame {
        let [key] = args else {
            return wrong_arity("incr");
        };
        let Some(key) = text(key) else {
            return Frame::error("invalid key");
        };

        match self.store.incr(&key, None).await {
            Ok(value) => Frame::Integer(value),
            Err(e) => store_error(e),
        }
    }

    async fn handle_expire(
        &self,
        args: &[Frame],
        name: &str,
        unit: fn(u64) -> Duration,
    ) -> Frame {
        let [key, amount] = args else {
            return wrong_arity(name);
        };
        let Some(key) = text(key) else {
            return Frame::error("invalid key");
        };
        let Some(amount) = text(amount).and_then(|s| s.parse::<u64>().ok()) else {
            return Frame::error("value is not an integer or out of range");
        };

        let ttl = unit(amount);
        if ttl > MAX_TTL {
            return Frame::error(format!("invalid expire time in '{}' command", name));
        }

        match self.store.expire(&key, ttl).await {
            Ok(updated) => Frame::Integer(i64::from(updated)),
            Err(e) => store_error(e),
        }
    }

    async fn handle_dbsize(&self) -> Frame {
        match self.store.stats().await {
            Ok(stats) => Frame::Integer(stats.size as i64),
            Err(e) => store_error(e),
        }
    }

    async fn handle_flushdb(&self) -> Frame {
        match self.store.clear().await {
            Ok(()) => Frame::ok(),
            Err(e) => store_error(e),
        }
    }

    async fn handle_info(&self) -> Frame {
        let stats = match self.store.stats().await {
            Ok(stats) => stats,
            Err(e) => return store_error(e),
        };
        let info = format!(
            "# Server\r\n\
             shelfd_version:{}\r\n\
             store:{}\r\n\
             \r\n\
             # Stats\r\n\
             keys:{}\r\n\
             hits:{}\r\n\
             misses:{}\r\n\
             hit_rate:{:.2}\r\n\
             evictions:{}\r\n\
             default_ttl_ms:{}\r\n",
            env!("CARGO_PKG_VERSION"),
            self.store.name(),
            stats.size,
            stats.hits,
            stats.misses,
            stats.hit_rate,
            stats.evictions,
            self.store.default_ttl().as_millis(),
        );
        Frame::bulk(info)
    }

    fn handle_command(&self) -> Frame {
        // Empty reply keeps redis-cli happy
        Frame::Array(Some(vec![]))
    }
}

fn text(frame: &Frame) -> Option<String> {
    frame
        .as_bytes()
        .and_then(|b| std::str::from_utf8(b).ok())
        .map(str::to_string)
}

fn wrong_arity(command: &str) -> Frame {
    Frame::error(format!("wrong number of arguments for '{}' command", command))
}

fn store_error(error: Error) -> Frame {
    match error {
        Error::NotAnInteger(_) => Frame::error("value is not an integer or out of range"),
        Error::Remote(message) => Frame::Error(message),
        other => Frame::error(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfstore::MemoryStore;

    fn handler() -> CommandHandler {
        CommandHandler::new(Arc::new(MemoryStore::new("l2", 100, Duration::from_secs(60))))
    }

    async fn run(handler: &CommandHandler, parts: &[&str]) -> Frame {
        handler.handle(Frame::command(parts.iter().map(|p| p.as_bytes().to_vec()))).await
    }

    #[tokio::test]
    async fn test_ping() {
        let handler = handler();
        assert_eq!(run(&handler, &["PING"]).await, Frame::Simple("PONG".to_string()));
        assert_eq!(run(&handler, &["ping", "hi"]).await, Frame::bulk("hi"));
    }

    #[tokio::test]
    async fn test_echo() {
        let handler = handler();
        assert_eq!(run(&handler, &["ECHO", "hello"]).await, Frame::bulk("hello"));
        assert!(matches!(run(&handler, &["ECHO"]).await, Frame::Error(_)));
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let handler = handler();
        assert_eq!(run(&handler, &["SET", "mykey", "myvalue"]).await, Frame::ok());
        assert_eq!(run(&handler, &["GET", "mykey"]).await, Frame::bulk("myvalue"));
        assert_eq!(run(&handler, &["GET", "nokey"]).await, Frame::nil());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_with_expiry() {
        let handler = handler();
        assert_eq!(run(&handler, &["SET", "a", "1", "PX", "100"]).await, Frame::ok());
        assert_eq!(run(&handler, &["SET", "b", "1", "ex", "1"]).await, Frame::ok());

        tokio::time::advance(Duration::from_millis(101)).await;
        assert_eq!(run(&handler, &["GET", "a"]).await, Frame::nil());
        assert_eq!(run(&handler, &["GET", "b"]).await, Frame::bulk("1"));

        assert!(matches!(run(&handler, &["SET", "c", "1", "EX", "0"]).await, Frame::Error(_)));
        assert!(matches!(run(&handler, &["SET", "c", "1", "XX"]).await, Frame::Error(_)));
    }

    #[tokio::test]
    async fn test_del_and_exists_count() {
        let handler = handler();
        run(&handler, &["SET", "a", "1"]).await;
        run(&handler, &["SET", "b", "1"]).await;

        assert_eq!(run(&handler, &["EXISTS", "a", "b", "c"]).await, Frame::Integer(2));
        assert_eq!(run(&handler, &["DEL", "a", "c"]).await, Frame::Integer(1));
        assert_eq!(run(&handler, &["EXISTS", "a"]).await, Frame::Integer(0));
    }

    #[tokio::test]
    async fn test_keys_and_scan() {
        let handler = handler();
        for key in ["products:1", "products:2", "other:1"] {
            run(&handler, &["SET", key, "x"]).await;
        }

        assert_eq!(
            run(&handler, &["KEYS", "products:*"]).await,
            Frame::Array(Some(vec![Frame::bulk("products:1"), Frame::bulk("products:2")]))
        );

        let reply = run(&handler, &["SCAN", "0", "MATCH", "other:*", "COUNT", "100"]).await;
        assert_eq!(
            reply,
            Frame::Array(Some(vec![
                Frame::bulk("0"),
                Frame::Array(Some(vec![Frame::bulk("other:1")])),
            ]))
        );
        assert!(matches!(run(&handler, &["SCAN", "0", "MATCH"]).await, Frame::Error(_)));
    }

    #[tokio::test]
    async fn test_incr() {
        let handler = handler();
        assert_eq!(run(&handler, &["INCR", "n"]).await, Frame::Integer(1));
        assert_eq!(run(&handler, &["INCR", "n"]).await, Frame::Integer(2));

        run(&handler, &["SET", "s", "abc"]).await;
        assert_eq!(
            run(&handler, &["INCR", "s"]).await,
            Frame::Error("ERR value is not an integer or out of range".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_commands() {
        let handler = handler();
        run(&handler, &["SET", "k", "v"]).await;

        assert_eq!(run(&handler, &["PEXPIRE", "k", "50"]).await, Frame::Integer(1));
        assert_eq!(run(&handler, &["EXPIRE", "missing", "5"]).await, Frame::Integer(0));

        tokio::time::advance(Duration::from_millis(51)).await;
        assert_eq!(run(&handler, &["GET", "k"]).await, Frame::nil());
    }

    #[tokio::test]
    async fn test_out_of_range_expire_times_are_rejected() {
        let handler = handler();
        let max = u64::MAX.to_string();

        assert_eq!(
            run(&handler, &["SET", "k", "v", "EX", &max]).await,
            Frame::error("invalid expire time in 'set' command")
        );
        assert!(matches!(run(&handler, &["SET", "k", "v", "PX", &max]).await, Frame::Error(_)));
        assert_eq!(run(&handler, &["GET", "k"]).await, Frame::nil());

        run(&handler, &["SET", "k", "v"]).await;
        assert_eq!(
            run(&handler, &["PEXPIRE", "k", &max]).await,
            Frame::error("invalid expire time in 'pexpire' command")
        );
        assert!(matches!(run(&handler, &["EXPIRE", "k", &max]).await, Frame::Error(_)));

        // The store keeps serving afterwards
        assert_eq!(run(&handler, &["GET", "k"]).await, Frame::bulk("v"));
        assert_eq!(run(&handler, &["EXPIRE", "k", "3600"]).await, Frame::Integer(1));
    }

    #[tokio::test]
    async fn test_dbsize_flushdb_info() {
        let handler = handler();
        run(&handler, &["SET", "a", "1"]).await;
        assert_eq!(run(&handler, &["DBSIZE"]).await, Frame::Integer(1));

        let info = run(&handler, &["INFO"]).await;
        let info = String::from_utf8(info.as_bytes().unwrap().to_vec()).unwrap();
        assert!(info.contains("keys:1"));
        assert!(info.contains("store:l2"));

        assert_eq!(run(&handler, &["FLUSHDB"]).await, Frame::ok());
        assert_eq!(run(&handler, &["DBSIZE"]).await, Frame::Integer(0));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let handler = handler();
        assert_eq!(
            run(&handler, &["NOPE"]).await,
            Frame::Error("ERR unknown command 'NOPE'".to_string())
        );
        assert_eq!(
            handler.handle(Frame::Integer(1)).await,
            Frame::error("invalid command format")
        );
    }
}
